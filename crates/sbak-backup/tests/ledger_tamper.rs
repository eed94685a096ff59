//! Integration test: ledger tamper detection across backups
//!
//! A ledger edited out of band must fail its chain check, while verify keeps
//! going and still reports the Merkle root match (the chain check is advisory).

use opendal::Operator;
use secrecy::SecretString;
use serde_json::Value;
use tempfile::TempDir;

use sbak_backup::{backup_file, verify_manifest, BackupOptions, ChainStatus, Ledger, LoadStatus};
use sbak_storage::BlobStore;

fn memory_store() -> BlobStore {
    let op = Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish();
    BlobStore::new(op, "test/ledger")
}

fn options() -> BackupOptions {
    BackupOptions {
        chunk_size: 512,
        kdf_iterations: 1_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn tampered_ledger_is_advisory_during_verify() {
    let tmp = TempDir::new().unwrap();
    let store = memory_store();
    let ledger_path = tmp.path().join("state/ledger.json");
    let passphrase = SecretString::from("ledger-test");

    let mut ledger = Ledger::open(&ledger_path).unwrap();
    let mut manifests = Vec::new();
    for i in 0..3u8 {
        let src = tmp.path().join(format!("file{i}.bin"));
        std::fs::write(&src, vec![i; 1500]).unwrap();
        let outcome = backup_file(&store, &mut ledger, &src, &passphrase, &options(), None)
            .await
            .unwrap();
        manifests.push(outcome.manifest);
    }
    assert!(ledger.verify_chain());
    assert_eq!(ledger.get_latest_root(), manifests[2].merkle_root);

    // Rewrite the middle entry's recorded root on disk
    let mut entries: Vec<Value> =
        serde_json::from_slice(&std::fs::read(&ledger_path).unwrap()).unwrap();
    entries[1]["payload"]["merkle_root"] = Value::String("0".repeat(64));
    std::fs::write(&ledger_path, serde_json::to_vec_pretty(&entries).unwrap()).unwrap();

    let reloaded = Ledger::open(&ledger_path).unwrap();
    assert_eq!(reloaded.load_status(), &LoadStatus::Loaded);
    assert!(!reloaded.verify_chain());
    assert_eq!(reloaded.first_broken_entry(), Some(1));

    let report = verify_manifest(&store, Some(&reloaded), &manifests[0], None)
        .await
        .expect("chain failure alone must not abort verify");
    assert_eq!(report.chain, ChainStatus::Broken { index: 1 });
    assert_eq!(report.merkle_root, manifests[0].merkle_root);
}

#[tokio::test]
async fn corrupt_ledger_reported_as_unavailable() {
    let tmp = TempDir::new().unwrap();
    let store = memory_store();
    let ledger_path = tmp.path().join("ledger.json");
    std::fs::write(&ledger_path, b"{ definitely not a ledger").unwrap();

    let mut ledger = Ledger::open(&ledger_path).unwrap();
    assert!(ledger.load_warning().is_some());

    let src = tmp.path().join("a.bin");
    std::fs::write(&src, b"some data").unwrap();

    let outcome = backup_file(
        &store,
        &mut ledger,
        &src,
        &SecretString::from("pw"),
        &options(),
        None,
    )
    .await
    .unwrap();
    // This process discarded the unreadable history, so it cannot vouch for the chain
    let report = verify_manifest(&store, Some(&ledger), &outcome.manifest, None)
        .await
        .unwrap();
    assert!(matches!(report.chain, ChainStatus::Unavailable { .. }));
    assert!(report.root_in_ledger);

    assert!(tmp.path().join("ledger.json.corrupt").exists());
    let reopened = Ledger::open(&ledger_path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.verify_chain());
}
