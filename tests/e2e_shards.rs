//! Shard completeness and temp-key handling across export and import.

mod common;

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{people, props};
use neo4j_backup::codec::record::EncodedNode;
use neo4j_backup::shard::{ShardKind, ShardReader};
use neo4j_backup::{Error, ExportConfig, Extractor, ImportConfig, Importer, Manifest, MemoryBackend, NodeRecord, Value};

#[tokio::test]
async fn every_node_lands_in_exactly_one_shard() {
    let src = people(50);
    let expected: Vec<NodeRecord> = {
        let graph = src.snapshot();
        graph.nodes().cloned().map(NodeRecord::from).collect()
    };

    let mut shard_counts = Vec::new();
    for threshold in [1, 250, 1_000, 1 << 20] {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("dump");
        let report = Extractor::new(&src, ExportConfig::new(&dir).with_shard_size_bytes(threshold).with_page_size(7))
            .run()
            .await
            .unwrap();
        shard_counts.push(report.node_shards);

        let reader =
            ShardReader::<EncodedNode>::open(dir.join("data"), ShardKind::Nodes, true, Some(report.node_shards)).unwrap();
        let mut decoded = Vec::new();
        for shard in reader {
            let (_, records) = shard.unwrap();
            assert!(!records.is_empty());
            decoded.extend(records.iter().map(|r| NodeRecord::from(r.decode().unwrap())));
        }
        assert_eq!(decoded, expected, "threshold {threshold}");
    }
    assert_eq!(shard_counts[0], 50);
    assert_eq!(shard_counts[3], 1);
    assert!(shard_counts[1] > shard_counts[2]);
}

#[tokio::test]
async fn reader_resumes_without_earlier_shards() {
    let src = people(12);
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    let report = Extractor::new(&src, ExportConfig::new(&dir).with_shard_size_bytes(1)).run().await.unwrap();
    assert_eq!(report.node_shards, 12);

    // earlier shards may be gone; resume never opens them
    let reader = ShardReader::<EncodedNode>::open(dir.join("data"), ShardKind::Nodes, true, None).unwrap();
    std::fs::remove_file(reader.path(0).unwrap()).unwrap();
    let ids: Vec<i64> = reader.resume(10).unwrap().flat_map(|s| s.unwrap().1).map(|n| n.node_id).collect();
    assert_eq!(ids.len(), 2);

    assert!(matches!(
        ShardReader::<EncodedNode>::open(dir.join("data"), ShardKind::Nodes, true, None),
        Err(Error::ShardSet { .. })
    ));
}

#[tokio::test]
async fn temp_key_never_collides_with_source_keys() {
    let src = MemoryBackend::new();
    let mut wide = neo4j_backup::PropertyMap::new();
    for i in 0..1000 {
        wide.insert(format!("k{i}"), Value::Int(i));
    }
    src.insert_node(["Wide"], wide).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    let report = Extractor::new(&src, ExportConfig::new(&dir))
        .with_rng(StdRng::seed_from_u64(11))
        .run()
        .await
        .unwrap();
    let manifest = Manifest::read(&dir).unwrap();
    assert_eq!(manifest.property_keys.len(), 1000);
    assert!(!manifest.property_keys.iter().any(|k| k.eq_ignore_ascii_case(&report.temp_key)));
}

#[tokio::test]
async fn temp_key_taken_in_target() {
    let src = people(4);
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    let export = Extractor::new(&src, ExportConfig::new(&dir)).run().await.unwrap();

    // an empty target whose token registry already knows the key
    let target = MemoryBackend::new();
    target.insert_node(["Tmp"], props(&[(export.temp_key.as_str(), Value::Int(1))])).unwrap();
    target.add_unique_constraint("keep", "Tmp", &export.temp_key).unwrap();

    let err = Importer::new(&target, ImportConfig::new(&dir).with_assume_yes(true)).run().await.unwrap_err();
    assert!(matches!(err, Error::SchemaConflict(_)), "{err}");
    assert_eq!(target.snapshot().node_count(), 1);

    let report = Importer::new(
        &target,
        ImportConfig::new(&dir).with_assume_yes(true).with_allow_temp_key_overwrite(true),
    )
    .with_rng(StdRng::seed_from_u64(5))
    .run()
    .await
    .unwrap();
    assert_ne!(report.temp_key, export.temp_key);
    assert_eq!(report.nodes_created, 4);
    assert_eq!(report.relationships_created, 3);

    let graph = target.snapshot();
    let keys: BTreeSet<&String> = graph.nodes().flat_map(|n| n.properties.keys()).collect();
    assert!(!keys.contains(&report.temp_key));
    // the squatter's own property survives
    assert!(keys.contains(&export.temp_key));
}
