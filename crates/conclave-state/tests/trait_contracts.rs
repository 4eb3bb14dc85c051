//! Trait contract tests for CheckpointStore.
//!
//! Every conforming implementation must pass these; they run against both the
//! in-memory fake and the filesystem store.

use conclave_state::fakes::{FailingCheckpointStore, FlakyCheckpointStore, MemoryCheckpointStore};
use conclave_state::{Checkpoint, CheckpointStore, FsCheckpointStore, StorageError};
use serde_json::json;

fn checkpoint(session: &str, seq: u64, next: Option<&str>) -> Checkpoint {
    Checkpoint::new(
        session,
        seq,
        next.map(str::to_string),
        "execution",
        json!({ "session": session, "checkpoint_count": seq, "results": ["r1"] }),
    )
    .unwrap()
}

async fn latest_wins(store: &dyn CheckpointStore) {
    store.put("s1", checkpoint("s1", 1, Some("planning"))).await.unwrap();
    store.put("s1", checkpoint("s1", 2, Some("supervisor"))).await.unwrap();

    let latest = store.get("s1").await.unwrap().expect("checkpoint present");
    assert_eq!(latest.sequence, 2);
    assert_eq!(latest.next_node.as_deref(), Some("supervisor"));
}

async fn sessions_are_isolated(store: &dyn CheckpointStore) {
    store.put("left", checkpoint("left", 1, None)).await.unwrap();
    store.put("right", checkpoint("right", 7, None)).await.unwrap();

    assert_eq!(store.list("left").await.unwrap().len(), 1);
    assert_eq!(store.get("right").await.unwrap().unwrap().sequence, 7);
}

async fn same_sequence_overwrites(store: &dyn CheckpointStore) {
    store.put("s2", checkpoint("s2", 1, Some("planning"))).await.unwrap();
    store.put("s2", checkpoint("s2", 1, Some("review"))).await.unwrap();

    let all = store.list("s2").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].next_node.as_deref(), Some("review"));
}

async fn delete_clears_history(store: &dyn CheckpointStore) {
    store.put("s3", checkpoint("s3", 1, None)).await.unwrap();
    store.delete("s3").await.unwrap();

    assert!(store.get("s3").await.unwrap().is_none());
    assert!(store.list("s3").await.unwrap().is_empty());
}

async fn stored_state_survives_verbatim(store: &dyn CheckpointStore) {
    let cp = checkpoint("s4", 3, Some("consensus"));
    store.put("s4", cp.clone()).await.unwrap();

    let back = store.get("s4").await.unwrap().unwrap();
    assert_eq!(back.state, cp.state);
    assert_eq!(back.state_digest, cp.state_digest);
    back.verify().unwrap();
}

async fn latest_sequence_matches_get(store: &dyn CheckpointStore) {
    assert_eq!(store.latest_sequence("s5").await.unwrap(), None);
    for seq in [2, 9, 4] {
        store.put("s5", checkpoint("s5", seq, None)).await.unwrap();
    }
    let latest = store.get("s5").await.unwrap().unwrap();
    assert_eq!(store.latest_sequence("s5").await.unwrap(), Some(latest.sequence));
    assert_eq!(latest.sequence, 9);
}

async fn float_state_reads_back_intact(store: &dyn CheckpointStore) {
    let values = [
        39.430133835633676,
        30.89370576086303,
        29.068040324874378,
        0.1 + 0.2,
        1.0 / 3.0,
        2.0_f64.sqrt() * 1e-7,
        6.02214076e23,
    ];
    for (i, agreement) in values.iter().enumerate() {
        let seq = i as u64 + 1;
        let cp = Checkpoint::new(
            "floats",
            seq,
            Some("review".to_string()),
            "consensus",
            json!({
                "consensus_results": { "agreement": agreement },
                "confidences": [0.93, 0.71, 0.64, agreement / 100.0],
                "consensus_threshold": 0.7,
            }),
        )
        .unwrap();
        store.put("floats", cp.clone()).await.unwrap();

        let back = store.get("floats").await.unwrap().unwrap();
        assert_eq!(back.sequence, seq);
        assert_eq!(back.state, cp.state, "agreement {agreement}");
    }
    assert_eq!(store.list("floats").await.unwrap().len(), values.len());
}

// ===========================================================================
// MemoryCheckpointStore
// ===========================================================================

#[tokio::test]
async fn memory_latest_wins() {
    latest_wins(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_sessions_are_isolated() {
    sessions_are_isolated(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_same_sequence_overwrites() {
    same_sequence_overwrites(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_delete_clears_history() {
    delete_clears_history(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_stored_state_survives_verbatim() {
    stored_state_survives_verbatim(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_latest_sequence_matches_get() {
    latest_sequence_matches_get(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn memory_float_state_reads_back_intact() {
    float_state_reads_back_intact(&MemoryCheckpointStore::new()).await;
}

// ===========================================================================
// FsCheckpointStore
// ===========================================================================

#[tokio::test]
async fn fs_latest_sequence_matches_get() {
    let dir = tempfile::tempdir().unwrap();
    latest_sequence_matches_get(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_float_state_reads_back_intact() {
    let dir = tempfile::tempdir().unwrap();
    float_state_reads_back_intact(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_latest_wins() {
    let dir = tempfile::tempdir().unwrap();
    latest_wins(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_sessions_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    sessions_are_isolated(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_same_sequence_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    same_sequence_overwrites(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_delete_clears_history() {
    let dir = tempfile::tempdir().unwrap();
    delete_clears_history(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_stored_state_survives_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    stored_state_survives_verbatim(&FsCheckpointStore::new(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn fs_store_reopens_existing_root() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        store.put("durable", checkpoint("durable", 5, None)).await.unwrap();
    }
    let reopened = FsCheckpointStore::new(dir.path()).unwrap();
    assert_eq!(reopened.get("durable").await.unwrap().unwrap().sequence, 5);
}

// ===========================================================================
// FailingCheckpointStore
// ===========================================================================

#[tokio::test]
async fn failing_store_reports_backend_errors() {
    let store = FailingCheckpointStore;
    assert!(matches!(
        store.get("any").await,
        Err(StorageError::Backend(_))
    ));
    assert!(store.put("any", checkpoint("any", 1, None)).await.is_err());
    assert!(store.latest_sequence("any").await.is_err());
}

#[tokio::test]
async fn flaky_store_fails_one_read_only() {
    let store = FlakyCheckpointStore::new();
    store.put("f", checkpoint("f", 3, None)).await.unwrap();

    store.fail_next_read();
    assert!(store.latest_sequence("f").await.is_err());
    assert_eq!(store.latest_sequence("f").await.unwrap(), Some(3));

    store.fail_next_read();
    assert!(store.get("f").await.is_err());
    assert_eq!(store.get("f").await.unwrap().unwrap().sequence, 3);
    latest_sequence_matches_get(&store).await;
}

#[tokio::test]
async fn fs_snapshot_digests_survive_float_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCheckpointStore::new(dir.path()).unwrap();

    for k in 1..=400u64 {
        let score = (k as f64 * 0.791_939).sin().abs() * 100.0;
        let cp = Checkpoint::new("sweep", k, None, "review", json!({ "agreement": score }))
            .unwrap();
        store.put("sweep", cp).await.unwrap();

        let back = store.get("sweep").await.unwrap().unwrap();
        assert_eq!(back.state["agreement"].as_f64(), Some(score));
    }
}
