use thiserror::Error;

pub type SbakResult<T> = Result<T, SbakError>;

#[derive(Debug, Error)]
pub enum SbakError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("ledger chain broken: {0}")]
    ChainBroken(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("no chunks remaining")]
    Exhausted,

    #[error("config error: {0}")]
    Config(String),
}

impl SbakError {
    /// Stable short name for the error kind, used in CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            SbakError::NotFound(_) => "not_found",
            SbakError::Io(_) => "io",
            SbakError::Crypto(_) => "crypto",
            SbakError::AuthenticationFailed(_) => "authentication_failed",
            SbakError::InvalidParams(_) => "invalid_params",
            SbakError::Network(_) => "network",
            SbakError::Integrity(_) => "integrity",
            SbakError::ChainBroken(_) => "chain_broken",
            SbakError::Format(_) => "format",
            SbakError::Exhausted => "exhausted",
            SbakError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for SbakError {
    fn from(e: serde_json::Error) -> Self {
        SbakError::Format(e.to_string())
    }
}
