//! sbak-storage: OpenDAL object store for encrypted chunks and manifests

pub mod health;
pub mod operator;
pub mod store;

pub use health::{check_health, is_healthy};
pub use operator::{build_operator, build_store, S3Credentials};
pub use store::{BlobStore, URI_SCHEME};
