//! Failure handling: the node barrier, shard rollback, resume and
//! connectivity loss.

mod common;

use pretty_assertions::assert_eq;

use common::{fingerprint, people, TestExecutor};
use neo4j_backup::{
    Error, ExportConfig, Extractor, ImportConfig, ImportPhase, Importer, MemoryBackend, QueryExecutor, TxMode,
};
use tempfile::TempDir;

/// Export `nodes` chained people into several small shards.
async fn dump(nodes: i64) -> (MemoryBackend, TempDir, std::path::PathBuf) {
    let src = people(nodes);
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    let report = Extractor::new(&src, ExportConfig::new(&dir).with_compress(false).with_shard_size_bytes(300))
        .run()
        .await
        .unwrap();
    assert!(report.node_shards >= 3, "need several node shards, got {}", report.node_shards);
    (src, tmp, dir)
}

fn is_rel_create(statement: &str) -> bool {
    statement.contains("CREATE (s)-[r")
}

#[tokio::test]
async fn relationships_refused_before_nodes_load() {
    let (_src, _tmp, dir) = dump(20).await;
    let target = TestExecutor::new(MemoryBackend::new());
    let mut importer = Importer::new(&target, ImportConfig::new(&dir));
    importer.prepare().await.unwrap();
    assert_eq!(importer.phase(), ImportPhase::IndexTempKey);

    let err = importer.load_relationships().await.unwrap_err();
    assert!(matches!(err, Error::InvalidPhase { .. }), "{err}");
    assert!(!target.statements().iter().any(|s| is_rel_create(s)));
    assert_eq!(target.inner.snapshot().relationship_count(), 0);
}

#[tokio::test]
async fn failed_node_shard_blocks_relationships_and_can_resume() {
    let (src, _tmp, dir) = dump(20).await;
    let target = TestExecutor::new(MemoryBackend::new());
    // second node shard fails
    target.fail_once("CREATE (n", 1);

    let mut importer = Importer::new(&target, ImportConfig::new(&dir).with_workers(1));
    importer.prepare().await.unwrap();
    let err = importer.load_nodes().await.unwrap_err();
    match &err {
        Error::ImportTransaction { shard, .. } => assert_eq!(shard, "nodes_000001.json"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(importer.phase(), ImportPhase::Failed);

    // the barrier holds after a failure
    assert!(matches!(importer.load_relationships().await, Err(Error::InvalidPhase { .. })));
    assert!(!target.statements().iter().any(|s| is_rel_create(s)));

    let resume = importer.resume_point().unwrap().clone();
    assert_eq!(resume.phase, ImportPhase::LoadNodes);
    assert_eq!(resume.node_shards_done.iter().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!(resume.first_pending_node_shard(), 1);

    // shard 0 committed, shard 1 rolled back
    let committed = target.inner.snapshot().node_count();
    assert!(committed > 0 && committed < 20);

    let report = Importer::new(&target, ImportConfig::new(&dir).with_resume(resume)).run().await.unwrap();
    assert_eq!(report.nodes_created as usize + committed, 20);
    assert_eq!(report.relationships_created, 19);
    assert_eq!(fingerprint(&target.inner), fingerprint(&src));
}

#[tokio::test]
async fn failed_relationship_shard_resumes_without_duplicates() {
    let (src, _tmp, dir) = dump(20).await;
    let target = TestExecutor::new(MemoryBackend::new());
    target.fail_once("CREATE (s)-[r", 1);

    let mut importer = Importer::new(&target, ImportConfig::new(&dir).with_workers(1));
    let err = importer.run().await.unwrap_err();
    assert!(matches!(err, Error::ImportTransaction { .. }));
    let resume = importer.resume_point().unwrap().clone();
    assert_eq!(resume.phase, ImportPhase::LoadRelationships);
    assert_eq!(resume.relationship_shards_done.len(), 1);

    Importer::new(&target, ImportConfig::new(&dir).with_resume(resume)).run().await.unwrap();
    assert_eq!(fingerprint(&target.inner), fingerprint(&src));
}

#[tokio::test]
async fn non_empty_target_is_refused_without_confirmation() {
    let (_src, _tmp, dir) = dump(5).await;
    let target = people(1);
    let err = Importer::new(&target, ImportConfig::new(&dir)).run().await.unwrap_err();
    assert!(matches!(err, Error::Aborted(_)));
    assert_eq!(target.snapshot().node_count(), 1);

    Importer::new(&target, ImportConfig::new(&dir).with_assume_yes(true)).run().await.unwrap();
    assert_eq!(target.snapshot().node_count(), 6);
}

#[tokio::test]
async fn importing_into_the_source_is_refused() {
    let (src, _tmp, dir) = dump(5).await;
    let err = Importer::new(&src, ImportConfig::new(&dir)).run().await.unwrap_err();
    assert!(matches!(err, Error::Aborted(_)));
}

#[tokio::test]
async fn disconnected_executor_surfaces_connectivity_error() {
    let src = people(3);
    src.disconnect();
    let tmp = tempfile::tempdir().unwrap();
    let err = Extractor::new(&src, ExportConfig::new(tmp.path().join("x"))).run().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert!(!tmp.path().join("x").exists());

    src.reconnect();
    let dir = tmp.path().join("x");
    Extractor::new(&src, ExportConfig::new(&dir)).run().await.unwrap();

    let target = MemoryBackend::new();
    target.disconnect();
    let err = Importer::new(&target, ImportConfig::new(&dir)).run().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert!(target.begin_tx(TxMode::ReadOnly).await.is_err());
}

#[tokio::test]
async fn corrupted_hash_is_reported_with_location() {
    let src = MemoryBackend::new();
    src.insert_node(["Note"], common::props(&[("text", neo4j_backup::Value::from("$date(not really)"))]))
        .unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    Extractor::new(&src, ExportConfig::new(&dir).with_compress(false)).run().await.unwrap();

    let shard = dir.join("data").join("nodes_000000.json");
    let text = std::fs::read_to_string(&shard).unwrap();
    let mut records: serde_json::Value = serde_json::from_str(&text).unwrap();
    records[0]["hash_props"]["text"] = serde_json::Value::from("0".repeat(64));
    std::fs::write(&shard, serde_json::to_string(&records).unwrap()).unwrap();

    let target = MemoryBackend::new();
    let err = Importer::new(&target, ImportConfig::new(&dir)).run().await.unwrap_err();
    match err {
        Error::Decoding { location, .. } => assert!(location.starts_with("nodes_000000.json record 0"), "{location}"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(target.snapshot().node_count(), 0);
}
