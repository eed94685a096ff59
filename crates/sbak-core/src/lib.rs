pub mod config;
pub mod error;

pub use config::SbakConfig;
pub use error::{SbakError, SbakResult};
