//! OpenDAL Operator factory for sbak storage backends

use opendal::{Builder, Operator};
use secrecy::{ExposeSecret, SecretString};

use sbak_core::config::{StorageBackend, StorageConfig};
use sbak_core::{SbakError, SbakResult};

use crate::store::BlobStore;

/// S3 credentials, read from the standard AWS environment variables
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl S3Credentials {
    /// `None` unless both `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` are set.
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key: SecretString::from(secret),
        })
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

fn finish<B: Builder>(builder: B, backend: &str) -> SbakResult<Operator> {
    let op = Operator::new(builder)
        .map_err(|e| SbakError::Config(format!("creating OpenDAL {backend} operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

/// Build an OpenDAL Operator for the configured backend.
///
/// For S3, a plaintext `http://` endpoint is refused when `enforce_tls` is set
/// and logged as a warning otherwise. S3 uses path-style addressing (the
/// opendal 0.55 default), which SeaweedFS and MinIO require.
pub fn build_operator(
    storage: &StorageConfig,
    credentials: Option<&S3Credentials>,
) -> SbakResult<Operator> {
    match storage.backend {
        StorageBackend::Fs => {
            let root = storage.root.to_string_lossy();
            finish(opendal::services::Fs::default().root(&root), "fs")
        }
        StorageBackend::Memory => {
            tracing::warn!("memory storage backend selected: backups are lost when sbak exits");
            finish(opendal::services::Memory::default(), "memory")
        }
        StorageBackend::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    return Err(SbakError::Config(format!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    )));
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP: credentials are transmitted unencrypted. \
                     Set storage.enforce_tls = true and use HTTPS in production."
                );
            }

            // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
            let mut builder = opendal::services::S3::default()
                .endpoint(&storage.endpoint)
                .region(&storage.region)
                .bucket(&storage.bucket);
            if let Some(creds) = credentials {
                builder = builder
                    .access_key_id(&creds.access_key_id)
                    .secret_access_key(creds.secret_access_key.expose_secret());
            }
            finish(builder, "S3")
        }
    }
}

/// Build the blob store for one CLI run: operator plus key prefix.
pub fn build_store(
    storage: &StorageConfig,
    credentials: Option<&S3Credentials>,
) -> SbakResult<BlobStore> {
    let op = build_operator(storage, credentials)?;
    tracing::debug!(backend = ?storage.backend, prefix = %storage.prefix, "storage ready");
    Ok(BlobStore::new(op, &storage.prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config(endpoint: &str, enforce_tls: bool) -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::S3,
            endpoint: endpoint.into(),
            enforce_tls,
            ..Default::default()
        }
    }

    fn test_credentials() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-key".into(),
            secret_access_key: SecretString::from("test-secret"),
        }
    }

    #[test]
    fn test_build_s3_http_warning() {
        // HTTP endpoint with enforce_tls=false should succeed (but log warning)
        let result = build_operator(
            &s3_config("http://localhost:8333", false),
            Some(&test_credentials()),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_s3_http_enforce_tls() {
        let result = build_operator(
            &s3_config("http://insecure:8333", true),
            Some(&test_credentials()),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, SbakError::Config(_)));
        assert!(
            err.to_string().contains("enforce_tls"),
            "error message should mention enforce_tls"
        );
    }

    #[test]
    fn test_build_s3_https() {
        let result = build_operator(
            &s3_config("https://s3.example.com:8333", true),
            Some(&test_credentials()),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_fs_and_memory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = StorageConfig {
            backend: StorageBackend::Fs,
            root: tmp.path().to_path_buf(),
            ..Default::default()
        };
        assert!(build_operator(&fs, None).is_ok());

        let memory = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let store = build_store(&memory, None).unwrap();
        assert_eq!(store.prefix(), "backups");
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let rendered = format!("{:?}", test_credentials());
        assert!(rendered.contains("test-key"));
        assert!(!rendered.contains("test-secret"));
    }
}
