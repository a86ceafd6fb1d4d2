use super::*;

const DIARY: Address = Address([0x5f; 20]);
const ALICE: Address = Address([0xa1; 20]);
const BOB: Address = Address([0xb0; 20]);

async fn deployed_storage() -> Storage {
    let storage = Storage::new(MEMORY_DATABASE_URL).await.expect("db");
    storage
        .deploy_diary(DIARY, ChainId(31_337), "hardhat")
        .await
        .expect("deploy");
    storage
}

fn submission(
    tx: u8,
    previous: Option<Handle>,
    sum: (u8, u64),
    trend: (u8, u64),
) -> NewSubmission {
    NewSubmission {
        tx_hash: TxHash([tx; 32]),
        diary: DIARY,
        sender: ALICE,
        previous_sum_handle: previous,
        sum_handle: Handle([sum.0; 32]),
        sum_value: sum.1,
        trend_handle: Handle([trend.0; 32]),
        trend_value: trend.1,
        mined_at: Utc::now(),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new(MEMORY_DATABASE_URL).await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("diary.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn deploy_is_idempotent_per_address() {
    let storage = deployed_storage().await;
    let first = storage.load_diary(DIARY).await.expect("load").expect("diary");
    assert_eq!(first.entry_count, 0);
    assert_eq!(first.trend_handle, None);

    let again = storage
        .deploy_diary(DIARY, ChainId(31_337), "renamed")
        .await
        .expect("deploy again");
    assert_eq!(again.chain_name, "hardhat");
    assert_eq!(again.deployed_at_block, first.deployed_at_block);
    assert_eq!(storage.list_diaries().await.expect("list").len(), 1);
}

#[tokio::test]
async fn submission_updates_counter_handles_and_contract_acl() {
    let storage = deployed_storage().await;
    let receipt = storage
        .record_submission(submission(1, None, (0x10, 4), (0x11, 4)))
        .await
        .expect("submit");
    assert_eq!(receipt.status, TxStatus::Mined);
    assert_eq!(receipt.block_number, 2);

    let diary = storage.load_diary(DIARY).await.expect("load").expect("diary");
    assert_eq!(diary.entry_count, 1);
    assert_eq!(diary.sum_handle, Some(Handle([0x10; 32])));
    assert_eq!(diary.trend_handle, Some(Handle([0x11; 32])));
    assert_eq!(
        storage.ciphertext_value(Handle([0x11; 32])).await.expect("value"),
        Some(4)
    );
    assert!(storage
        .is_allowed(Handle([0x11; 32]), DIARY)
        .await
        .expect("acl"));
    assert!(!storage
        .is_allowed(Handle([0x11; 32]), ALICE)
        .await
        .expect("acl"));
    assert_eq!(storage.latest_block().await.expect("block"), 2);
}

#[tokio::test]
async fn stale_submission_is_refused_without_side_effects() {
    let storage = deployed_storage().await;
    storage
        .record_submission(submission(1, None, (0x10, 4), (0x11, 4)))
        .await
        .expect("first");

    let stale = storage
        .record_submission(submission(2, None, (0x20, 2), (0x21, 2)))
        .await;
    assert!(stale.is_err());

    let diary = storage.load_diary(DIARY).await.expect("load").expect("diary");
    assert_eq!(diary.entry_count, 1);
    assert_eq!(storage.ciphertext_value(Handle([0x20; 32])).await.expect("value"), None);
    assert!(!storage.transaction_exists(TxHash([2; 32])).await.expect("exists"));
}

#[tokio::test]
async fn access_grant_allows_sender_and_stores_receipt() {
    let storage = deployed_storage().await;
    storage
        .record_submission(submission(1, None, (0x10, 3), (0x11, 3)))
        .await
        .expect("submit");

    let receipt = storage
        .record_access_grant(NewAccessGrant {
            tx_hash: TxHash([9; 32]),
            diary: DIARY,
            sender: BOB,
            trend_handle: Handle([0x11; 32]),
            mined_at: Utc::now(),
        })
        .await
        .expect("grant");

    assert!(storage.is_allowed(Handle([0x11; 32]), BOB).await.expect("acl"));
    let loaded = storage
        .load_receipt(TxHash([9; 32]))
        .await
        .expect("receipt")
        .expect("some receipt");
    assert_eq!(loaded.block_number, receipt.block_number);
    assert_eq!(loaded.status, TxStatus::Mined);
    assert!(storage.load_receipt(TxHash([8; 32])).await.expect("receipt").is_none());
}

#[tokio::test]
async fn key_value_items_round_trip_in_sqlite_and_memory() {
    let sqlite = Storage::new(MEMORY_DATABASE_URL).await.expect("db");
    let memory = MemoryStore::new();
    let stores: [&dyn KeyValueStore; 2] = [&sqlite, &memory];

    for store in stores {
        assert_eq!(store.get_item("sig").await.expect("get"), None);
        store.set_item("sig", "v1").await.expect("set");
        store.set_item("sig", "v2").await.expect("overwrite");
        assert_eq!(store.get_item("sig").await.expect("get").as_deref(), Some("v2"));
        store.remove_item("sig").await.expect("remove");
        assert_eq!(store.get_item("sig").await.expect("get"), None);
    }
}
