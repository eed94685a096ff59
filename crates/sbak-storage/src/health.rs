//! Storage health check

use sbak_core::SbakResult;

use crate::store::BlobStore;

/// Verify the store is reachable by listing its prefix.
pub async fn check_health(store: &BlobStore) -> SbakResult<()> {
    store.list_prefix().await.map(|_| ())
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(store: &BlobStore) -> bool {
    check_health(store).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::Operator;

    #[tokio::test]
    async fn memory_store_is_healthy() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let store = BlobStore::new(op, "health");
        assert!(is_healthy(&store).await);
    }

    #[tokio::test]
    async fn fresh_fs_root_is_healthy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let op = Operator::new(
            opendal::services::Fs::default().root(&tmp.path().join("store").to_string_lossy()),
        )
        .unwrap()
        .finish();
        let store = BlobStore::new(op, "backups");
        check_health(&store).await.unwrap();
    }
}
