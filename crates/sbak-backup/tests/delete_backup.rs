//! Integration test: deleting one backup from in-memory storage
//!
//! The deleted backup's chunks and manifest disappear, other backups stay
//! verifiable, and the ledger gains a delete event that leaves the latest
//! recorded root alone.

use opendal::Operator;
use secrecy::SecretString;
use tempfile::TempDir;

use sbak_backup::{
    backup_file, delete_backup, verify_manifest, BackupOptions, BackupOutcome, Ledger,
};
use sbak_core::SbakError;
use sbak_storage::BlobStore;

fn memory_store() -> BlobStore {
    let op = Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish();
    BlobStore::new(op, "test/delete")
}

async fn backup(
    tmp: &TempDir,
    store: &BlobStore,
    ledger: &mut Ledger,
    name: &str,
    len: usize,
) -> BackupOutcome {
    let src = tmp.path().join(name);
    std::fs::write(&src, vec![0x42u8; len]).unwrap();
    let opts = BackupOptions {
        chunk_size: 256,
        kdf_iterations: 1_000,
        manifest_dir: None,
        ..Default::default()
    };
    let outcome = backup_file(
        store,
        ledger,
        &src,
        &SecretString::from("delete-test"),
        &opts,
        None,
    )
    .await
    .unwrap();
    // Backup ids are millisecond timestamps
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    outcome
}

#[tokio::test]
async fn delete_removes_chunks_and_manifest_only_for_that_backup() {
    let tmp = TempDir::new().unwrap();
    let store = memory_store();
    let mut ledger = Ledger::open(&tmp.path().join("ledger.json")).unwrap();

    let doomed = backup(&tmp, &store, &mut ledger, "old.bin", 700).await;
    let kept = backup(&tmp, &store, &mut ledger, "new.bin", 500).await;
    assert_eq!(store.list_manifests().await.unwrap().len(), 2);

    let outcome = delete_backup(&store, &mut ledger, &doomed.manifest_uri)
        .await
        .unwrap();
    assert_eq!(outcome.file_name, "old.bin");
    assert_eq!(outcome.chunks_deleted, 3);
    assert_eq!(outcome.merkle_root, doomed.manifest.merkle_root);

    for chunk in &doomed.manifest.chunks {
        assert!(!store.exists(&chunk.uri).await.unwrap(), "{}", chunk.uri);
    }
    assert!(!store.exists(&doomed.manifest_uri).await.unwrap());
    assert_eq!(
        store.list_manifests().await.unwrap(),
        vec![kept.manifest_uri.clone()]
    );

    verify_manifest(&store, Some(&ledger), &kept.manifest, None)
        .await
        .expect("other backup still verifies");

    assert_eq!(ledger.len(), 3);
    assert!(ledger.verify_chain());
    assert_eq!(ledger.entries()[2].entry_hash, outcome.ledger_entry_hash);
    assert_eq!(ledger.entries()[2].payload["event"], "delete");
    assert!(ledger.entries()[2].payload.get("merkle_root").is_none());
    assert_eq!(ledger.get_latest_root(), kept.manifest.merkle_root);
}

#[tokio::test]
async fn delete_of_missing_manifest_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let store = memory_store();
    let mut ledger = Ledger::open(&tmp.path().join("ledger.json")).unwrap();

    let err = delete_backup(
        &store,
        &mut ledger,
        "store://test/delete/manifests/manifest_1.json",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SbakError::NotFound(_)));
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn delete_refuses_uris_outside_the_store_layout() {
    let tmp = TempDir::new().unwrap();
    let store = memory_store();
    let mut ledger = Ledger::open(&tmp.path().join("ledger.json")).unwrap();
    let outcome = backup(&tmp, &store, &mut ledger, "a.bin", 300).await;

    // A chunk URI is not a manifest
    let err = delete_backup(&store, &mut ledger, &outcome.manifest.chunks[0].uri)
        .await
        .unwrap_err();
    assert!(matches!(err, SbakError::InvalidParams(_)));

    // A manifest whose chunk list points elsewhere is rejected before any delete
    let mut forged = outcome.manifest.clone();
    forged.chunks[1].uri = "store://test/delete/manifests/precious.json".into();
    let forged_uri = store
        .put_manifest("manifest_forged.json", &forged.to_json().unwrap())
        .await
        .unwrap();
    let err = delete_backup(&store, &mut ledger, &forged_uri)
        .await
        .unwrap_err();
    assert!(matches!(err, SbakError::Format(_)));
    assert!(store.exists(&forged.chunks[0].uri).await.unwrap());
    assert!(store.exists(&forged_uri).await.unwrap());
    assert_eq!(ledger.len(), 1);
}
