use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use sproutfarm::config::{StorageBackend, StorageConfig};
use sproutfarm::farm::PlayerRecord;
use sproutfarm::storage::{
    FieldUpdate, JsonFilePlayerStore, Projection, RecordFilter, Revision, SledPlayerStore, StorageError,
    StorageGateway,
};

mod common;
use common::{growing_record, t0};

fn sled(dir: &TempDir) -> StorageGateway {
    StorageGateway::new(Arc::new(SledPlayerStore::open(dir.path().join("players")).unwrap()))
}

fn json(dir: &TempDir) -> StorageGateway {
    StorageGateway::new(Arc::new(JsonFilePlayerStore::open(dir.path().join("game_saves")).unwrap()))
}

async fn save_load_and_revisions(storage: StorageGateway) {
    assert!(assert_ok!(storage.load("alice").await).is_none());

    let saved = assert_ok!(storage.save(growing_record("alice", 3, 1, t0()), Revision::Expect(0)).await);
    assert_eq!(saved.revision, 1);
    let loaded = assert_ok!(storage.load("alice").await).unwrap();
    assert_eq!(loaded, saved);

    // creating again must not clobber the existing record
    let err = assert_err!(storage.save(growing_record("alice", 3, 0, t0()), Revision::Expect(0)).await);
    assert!(err.is_conflict());

    let mut next = loaded.clone();
    next.money = 99;
    let saved = assert_ok!(storage.save(next, Revision::Expect(1)).await);
    assert_eq!(saved.revision, 2);

    // stale writer loses
    let err = assert_err!(storage.save(loaded, Revision::Expect(1)).await);
    assert!(matches!(err, StorageError::Conflict { expected: 1, found: 2, .. }));

    let mismatched = growing_record("bob", 1, 0, t0());
    let err = storage.store().save_record("alice", &mismatched, Revision::Any).unwrap_err();
    assert!(matches!(err, StorageError::InvalidUpdate { .. }));
}

async fn field_updates(storage: StorageGateway) {
    assert_ok!(storage.save(growing_record("carol", 2, 1, t0()), Revision::Any).await);

    let update = FieldUpdate::new().set("money", &1234u64).unwrap().expect_revision(1);
    assert_eq!(assert_ok!(storage.update_fields("carol", update).await), 2);
    let record = storage.load("carol").await.unwrap().unwrap();
    assert_eq!(record.money, 1234);
    assert_eq!(record.land.len(), 2);
    assert_eq!(record.revision, 2);

    let stale = FieldUpdate::new().set("money", &1u64).unwrap().expect_revision(1);
    assert!(assert_err!(storage.update_fields("carol", stale).await).is_conflict());

    let protected = FieldUpdate::new().set("account_id", "mallory").unwrap();
    assert!(matches!(
        assert_err!(storage.update_fields("carol", protected).await),
        StorageError::InvalidUpdate { .. }
    ));

    // the merged document must still be a valid record
    let invalid = FieldUpdate::new().set("land", "not a list").unwrap();
    assert!(matches!(
        assert_err!(storage.update_fields("carol", invalid).await),
        StorageError::InvalidUpdate { .. }
    ));

    let missing = FieldUpdate::new().set("money", &1u64).unwrap();
    assert!(matches!(
        assert_err!(storage.update_fields("nobody", missing).await),
        StorageError::NotFound(_)
    ));
    assert_eq!(storage.load("carol").await.unwrap().unwrap().money, 1234);
}

async fn queries_and_batches(storage: StorageGateway) {
    assert_ok!(storage.save(growing_record("g1", 2, 1, t0()), Revision::Any).await);
    assert_ok!(storage.save(growing_record("g2", 2, 2, t0()), Revision::Any).await);
    assert_ok!(storage.save(growing_record("idle", 2, 0, t0()), Revision::Any).await);

    let growing = assert_ok!(
        storage
            .query(RecordFilter::HasGrowingPlot, Projection::Land, 100)
            .await
    );
    let mut ids: Vec<_> = growing.iter().map(|r| r.account_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["g1", "g2"]);
    // land projection drops everything but the accrual inputs
    assert!(growing.iter().all(|r| r.seeds.is_empty() && r.password_hash.is_none()));
    assert!(growing.iter().all(|r| r.revision == 1 && r.land.len() == 2));

    let online: HashSet<String> = ["g1".to_string()].into_iter().collect();
    let filter = RecordFilter::AllOf(vec![RecordFilter::HasGrowingPlot, RecordFilter::ExcludeAccounts(online)]);
    let offline = assert_ok!(storage.query(filter, Projection::Full, 100).await);
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0].account_id, "g2");

    let limited = assert_ok!(storage.query(RecordFilter::Any, Projection::Full, 2).await);
    assert_eq!(limited.len(), 2);

    let mut g2 = offline[0].clone();
    g2.land[0].grow_time = 7;
    let batch = vec![
        ("g2".to_string(), FieldUpdate::land_accrual(&g2, t0() + Duration::seconds(7)).unwrap()),
        ("g1".to_string(), FieldUpdate::new().set("money", &5u64).unwrap().expect_revision(40)),
        ("ghost".to_string(), FieldUpdate::new().set("money", &5u64).unwrap()),
    ];
    let results = assert_ok!(storage.update_many(batch).await);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "g2");
    assert_eq!(*results[0].1.as_ref().unwrap(), 2);
    assert!(results[1].1.as_ref().unwrap_err().is_conflict());
    assert!(matches!(results[2].1, Err(StorageError::NotFound(_))));

    let g2 = storage.load("g2").await.unwrap().unwrap();
    assert_eq!(g2.land[0].grow_time, 7);
    assert_eq!(g2.updated_at, t0() + Duration::seconds(7));
    assert_eq!(storage.load("g1").await.unwrap().unwrap().money, 0);

    let mut all = assert_ok!(storage.list_account_ids().await);
    all.sort();
    assert_eq!(all, vec!["g1", "g2", "idle"]);
}

async fn queries_resume_after_an_id(storage: StorageGateway) {
    // saved out of order on purpose
    for id in ["dan", "amy", "cat", "bea"] {
        assert_ok!(storage.save(growing_record(id, 1, 1, t0()), Revision::Any).await);
    }
    let ids = |records: Vec<PlayerRecord>| records.into_iter().map(|r| r.account_id).collect::<Vec<_>>();

    let first = assert_ok!(storage.query(RecordFilter::HasGrowingPlot, Projection::Land, 2).await);
    assert_eq!(ids(first), vec!["amy", "bea"]);

    let after = RecordFilter::AllOf(vec![RecordFilter::HasGrowingPlot, RecordFilter::IdAfter("bea".into())]);
    let next = assert_ok!(storage.query(after, Projection::Land, 2).await);
    assert_eq!(ids(next), vec!["cat", "dan"]);

    let wrapped = assert_ok!(storage.query(RecordFilter::IdAtMost("amy".into()), Projection::Land, 2).await);
    assert_eq!(ids(wrapped), vec!["amy"]);
}

#[tokio::test]
async fn sled_queries_resume_after_an_id() {
    let dir = TempDir::new().unwrap();
    queries_resume_after_an_id(sled(&dir)).await;
}

#[tokio::test]
async fn json_queries_resume_after_an_id() {
    let dir = TempDir::new().unwrap();
    queries_resume_after_an_id(json(&dir)).await;
}

#[tokio::test]
async fn sled_save_load_and_revisions() {
    let dir = TempDir::new().unwrap();
    save_load_and_revisions(sled(&dir)).await;
}

#[tokio::test]
async fn json_save_load_and_revisions() {
    let dir = TempDir::new().unwrap();
    save_load_and_revisions(json(&dir)).await;
}

#[tokio::test]
async fn sled_field_updates() {
    let dir = TempDir::new().unwrap();
    field_updates(sled(&dir)).await;
}

#[tokio::test]
async fn json_field_updates() {
    let dir = TempDir::new().unwrap();
    field_updates(json(&dir)).await;
}

#[tokio::test]
async fn sled_queries_and_batches() {
    let dir = TempDir::new().unwrap();
    queries_and_batches(sled(&dir)).await;
}

#[tokio::test]
async fn json_queries_and_batches() {
    let dir = TempDir::new().unwrap();
    queries_and_batches(json(&dir)).await;
}

#[tokio::test]
async fn json_store_handles_awkward_account_ids() {
    let dir = TempDir::new().unwrap();
    let storage = json(&dir);
    for id in ["玩家一", "a.b", "x y"] {
        let record = PlayerRecord::new(id, 1, t0());
        assert_ok!(storage.save(record, Revision::Any).await);
    }
    let mut ids = storage.list_account_ids().await.unwrap();
    ids.sort();
    let mut expected = vec!["玩家一".to_string(), "a.b".to_string(), "x y".to_string()];
    expected.sort();
    assert_eq!(ids, expected);
    // nothing escapes the store directory
    for entry in std::fs::read_dir(dir.path().join("game_saves")).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().to_string();
        assert!(!name.contains('/') && !name.contains(' '), "{name}");
    }
}

#[tokio::test]
async fn json_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Json,
        data_dir: dir.path().to_string_lossy().to_string(),
    };
    {
        let storage = StorageGateway::open(&config).unwrap();
        storage
            .save(growing_record("persist", 1, 1, t0()), Revision::Any)
            .await
            .unwrap();
    }
    let reopened = StorageGateway::open(&config).unwrap();
    let record = reopened.load("persist").await.unwrap().unwrap();
    assert_eq!(record.land[0].crop_type, "wheat");
    assert!(dir.path().join("game_saves").is_dir());
}

#[tokio::test]
async fn sled_backend_lives_under_players() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Sled,
        data_dir: dir.path().to_string_lossy().to_string(),
    };
    let storage = StorageGateway::open(&config).unwrap();
    storage
        .save(growing_record("persist", 1, 1, t0()), Revision::Any)
        .await
        .unwrap();
    assert!(dir.path().join("players").exists());
    assert_eq!(storage.list_account_ids().await.unwrap(), vec!["persist"]);
}
