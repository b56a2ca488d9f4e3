//! End-to-end: export a small graph, import it into an empty target and
//! compare the two graphs by content.

mod common;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use common::{fingerprint, props, TestExecutor};
use neo4j_backup::{
    Crs, ExportConfig, Extractor, ImportConfig, ImportPhase, Importer, IsoDuration, Manifest, MemoryBackend, Point,
    Value,
};

fn source() -> MemoryBackend {
    let db = MemoryBackend::new();
    let ada = db
        .insert_node(
            ["Person", "Engineer"],
            props(&[
                ("name", Value::from("Ada")),
                ("home", Value::Point(Point::new(Crs::Cartesian3D, 1.5, -2.0, Some(3.25)).unwrap())),
                ("tenure", Value::from(IsoDuration::new(14, 3, 3, 500_000_000))),
                ("motto", Value::from("$point({x:1,y:2})")),
                ("scores", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
            ]),
        )
        .unwrap();
    let bob = db
        .insert_node(["Person"], props(&[("name", Value::from("Bob")), ("born", Value::from(NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()))]))
        .unwrap();
    let city = db.insert_node(["City"], props(&[("name", Value::from("London"))])).unwrap();
    db.insert_relationship(ada, bob, "KNOWS", props(&[("since", Value::from(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()))]))
        .unwrap();
    db.insert_relationship(bob, city, "LIVES_IN", props(&[("weight", Value::Float(0.75))])).unwrap();
    db.add_unique_constraint("person_name", "Person", "name").unwrap();
    db
}

#[tokio::test]
async fn export_then_import_reproduces_graph() {
    let src = source();
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");

    let export = Extractor::new(&src, ExportConfig::new(&dir).with_compress(true)).run().await.unwrap();
    assert_eq!(export.node_records, 3);
    assert_eq!(export.relationship_records, 2);
    assert!(dir.join("data").join("nodes_000000.json.gz").exists());

    let manifest = Manifest::read(&dir).unwrap();
    assert!(manifest.compressed);
    assert_eq!(manifest.constraints.len(), 1);

    let target = TestExecutor::new(MemoryBackend::new());
    let mut importer = Importer::new(&target, ImportConfig::new(&dir));
    let report = importer.run().await.unwrap();
    assert_eq!(importer.phase(), ImportPhase::Done);
    assert_eq!(report.nodes_created, 3);
    assert_eq!(report.relationships_created, 2);
    assert_eq!(report.constraints_replayed, 1);
    assert_eq!(report.temp_key, export.temp_key);

    assert_eq!(fingerprint(&target.inner), fingerprint(&src));

    let graph = target.inner.snapshot();
    assert!(graph.nodes().all(|n| !n.properties.contains_key(&export.temp_key)));
    let constraints: Vec<String> = graph.constraints().map(|c| c.name.clone()).collect();
    assert_eq!(constraints, vec!["person_name".to_string()]);

    let ada = graph.nodes().find(|n| n.properties.get("name") == Some(&Value::from("Ada"))).unwrap();
    assert_eq!(ada.properties["motto"], Value::from("$point({x:1,y:2})"));
    assert_eq!(ada.properties["home"], Value::Point(Point::new(Crs::Cartesian3D, 1.5, -2.0, Some(3.25)).unwrap()));
}

#[tokio::test]
async fn relationship_statements_follow_every_node_statement() {
    let src = common::people(30);
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    Extractor::new(&src, ExportConfig::new(&dir).with_shard_size_bytes(400)).run().await.unwrap();

    let target = TestExecutor::new(MemoryBackend::new());
    let report = Importer::new(&target, ImportConfig::new(&dir).with_workers(3)).run().await.unwrap();
    assert!(report.node_shards > 1);
    assert_eq!(report.relationships_created, 29);

    let statements = target.statements();
    let last_node = statements.iter().rposition(|s| s.contains("CREATE (n")).unwrap();
    let first_rel = statements.iter().position(|s| s.contains("CREATE (s)-[r")).unwrap();
    assert!(last_node < first_rel);
    assert_eq!(fingerprint(&target.inner), fingerprint(&src));
}

#[tokio::test]
async fn four_x_target_gets_assert_syntax() {
    let src = source();
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dump");
    Extractor::new(&src, ExportConfig::new(&dir).with_indent_size(2)).run().await.unwrap();

    let target = TestExecutor::new(MemoryBackend::with_version("4.4.0"));
    Importer::new(&target, ImportConfig::new(&dir)).run().await.unwrap();
    let ddl: Vec<String> = target.statements().into_iter().filter(|s| s.starts_with("CREATE CONSTRAINT")).collect();
    assert!(!ddl.is_empty());
    assert!(ddl.iter().all(|s| s.contains(" ASSERT ")));
}
