//! Import pipeline: rebuild an exported graph in a target database.
//!
//! Nodes are created carrying a temporary unique key set to their source id.
//! Relationships then find their endpoints through that key, narrowed by
//! the recorded endpoint labels. Afterwards the key is stripped, its
//! constraints dropped and the original uniqueness constraints replayed.
//!
//! Each shard loads in one write transaction. A failed shard rolls back;
//! shards committed before it stay in the target, and the importer reports
//! a [`ResumePoint`] from which a later run can continue.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::codec::record::{DecodedNode, DecodedRelationship, EncodedNode, EncodedRelationship};
use crate::config::ImportConfig;
use crate::cypher::statements::{self, ConstraintDialect};
use crate::model::{PropertyMap, Value};
use crate::pool::run_bounded;
use crate::schema::{self, Manifest, SchemaSnapshot};
use crate::shard::{ShardKind, ShardReader};
use crate::storage::{finish_tx, QueryExecutor};
use crate::tx::TxMode;
use crate::{Error, Result};

// ============================================================================
// Phases
// ============================================================================

/// Import state machine. `phase()` reports the last phase that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportPhase {
    Init,
    ValidateTarget,
    IndexTempKey,
    LoadNodes,
    LoadRelationships,
    StripTempKey,
    ReplayConstraints,
    Done,
    Failed,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportPhase::Init => "INIT",
            ImportPhase::ValidateTarget => "VALIDATE_TARGET",
            ImportPhase::IndexTempKey => "INDEX_TEMP_KEY",
            ImportPhase::LoadNodes => "LOAD_NODES",
            ImportPhase::LoadRelationships => "LOAD_RELATIONSHIPS",
            ImportPhase::StripTempKey => "STRIP_TEMP_KEY",
            ImportPhase::ReplayConstraints => "REPLAY_CONSTRAINTS",
            ImportPhase::Done => "DONE",
            ImportPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Where a failed import stopped.
///
/// Feed it back through [`ImportConfig::with_resume`] to continue against
/// the same, otherwise untouched target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Phase that was running when the import failed.
    pub phase: ImportPhase,
    pub node_shards_done: BTreeSet<usize>,
    pub relationship_shards_done: BTreeSet<usize>,
    /// Temp key the committed nodes carry.
    pub temp_key: String,
}

impl ResumePoint {
    fn new(temp_key: String) -> Self {
        Self {
            phase: ImportPhase::Init,
            node_shards_done: BTreeSet::new(),
            relationship_shards_done: BTreeSet::new(),
            temp_key,
        }
    }

    /// First node shard not yet committed.
    pub fn first_pending_node_shard(&self) -> usize {
        first_gap(&self.node_shards_done)
    }

    pub fn first_pending_relationship_shard(&self) -> usize {
        first_gap(&self.relationship_shards_done)
    }
}

fn first_gap(done: &BTreeSet<usize>) -> usize {
    (0..).find(|i| !done.contains(i)).unwrap_or(done.len())
}

/// Result of a finished import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub node_shards: usize,
    pub relationship_shards: usize,
    pub constraints_replayed: usize,
    pub temp_key: String,
}

// ============================================================================
// Importer
// ============================================================================

/// State established by [`Importer::prepare`].
struct Prepared {
    manifest: Manifest,
    dialect: ConstraintDialect,
    nodes: ShardReader<EncodedNode>,
    relationships: ShardReader<EncodedRelationship>,
}

pub struct Importer<'a, E: QueryExecutor + ?Sized> {
    db: &'a E,
    config: ImportConfig,
    phase: ImportPhase,
    rng: StdRng,
    prepared: Option<Prepared>,
    progress: ResumePoint,
    report: ImportReport,
}

impl<'a, E: QueryExecutor + ?Sized> Importer<'a, E> {
    pub fn new(db: &'a E, config: ImportConfig) -> Self {
        Self {
            db,
            config,
            phase: ImportPhase::Init,
            rng: StdRng::from_os_rng(),
            prepared: None,
            progress: ResumePoint::new(String::new()),
            report: ImportReport::default(),
        }
    }

    /// Use a fixed randomness source for temp-key reallocation.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    /// Progress so far. After a failure this is what to resume from.
    pub fn resume_point(&self) -> Option<&ResumePoint> {
        self.prepared.as_ref().map(|_| &self.progress)
    }

    fn expect_phase(&self, expected: ImportPhase) -> Result<()> {
        if self.phase != expected {
            return Err(Error::InvalidPhase { expected: expected.to_string(), actual: self.phase.to_string() });
        }
        Ok(())
    }

    fn completed(&mut self, phase: ImportPhase) {
        tracing::info!(phase = %phase, "import phase complete");
        self.phase = phase;
    }

    fn fail(&mut self, running: ImportPhase, error: Error) -> Error {
        tracing::error!(phase = %running, error = %error, "import failed");
        self.progress.phase = running;
        self.phase = ImportPhase::Failed;
        error
    }

    /// Run every phase in order.
    pub async fn run(&mut self) -> Result<ImportReport> {
        self.prepare().await?;
        self.load_nodes().await?;
        self.load_relationships().await?;
        self.finish().await
    }

    // ========================================================================
    // INIT -> VALIDATE_TARGET -> INDEX_TEMP_KEY
    // ========================================================================

    /// Read the manifest, check the target and create the temp-key constraints.
    pub async fn prepare(&mut self) -> Result<()> {
        self.expect_phase(ImportPhase::Init)?;
        match self.prepare_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let running = match self.phase {
                    ImportPhase::Init => ImportPhase::ValidateTarget,
                    _ => ImportPhase::IndexTempKey,
                };
                Err(self.fail(running, e))
            }
        }
    }

    async fn prepare_inner(&mut self) -> Result<()> {
        self.config.validate()?;
        let manifest = Manifest::read(&self.config.project_dir)?;
        let data = self.config.data_dir();
        let nodes = ShardReader::open(&data, ShardKind::Nodes, manifest.compressed, Some(manifest.shards.nodes))?;
        let relationships = ShardReader::open(
            &data,
            ShardKind::Relationships,
            manifest.compressed,
            Some(manifest.shards.relationships),
        )?;
        self.db.run_auto(TxMode::ReadOnly, statements::PING, PropertyMap::new()).await?;

        let target = SchemaSnapshot::capture(self.db, false).await?;
        let progress = match self.config.resume.clone() {
            Some(resume) => {
                tracing::warn!(
                    phase = %resume.phase,
                    node_shards_done = resume.node_shards_done.len(),
                    relationship_shards_done = resume.relationship_shards_done.len(),
                    "resuming import, skipping target checks"
                );
                resume
            }
            None => {
                let key = schema::validate_target(&manifest, &target, &self.config, &mut self.rng)?;
                ResumePoint::new(key)
            }
        };
        self.progress = progress;
        self.report.temp_key = self.progress.temp_key.clone();
        self.completed(ImportPhase::ValidateTarget);

        let dialect = target.dialect();
        schema::create_temp_constraints(self.db, dialect, &manifest.node_labels, &self.progress.temp_key).await?;
        self.prepared = Some(Prepared { manifest, dialect, nodes, relationships });
        self.completed(ImportPhase::IndexTempKey);
        Ok(())
    }

    // ========================================================================
    // LOAD_NODES
    // ========================================================================

    /// Load every node shard not yet committed. Returns nodes created.
    pub async fn load_nodes(&mut self) -> Result<u64> {
        self.expect_phase(ImportPhase::IndexTempKey)?;
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::InvalidPhase { expected: ImportPhase::IndexTempKey.to_string(), actual: self.phase.to_string() });
        };
        let reader = &prepared.nodes;
        let pending: Vec<usize> = (0..reader.len()).filter(|i| !self.progress.node_shards_done.contains(i)).collect();
        tracing::info!(shards = reader.len(), pending = pending.len(), "loading node shards");

        let db = self.db;
        let temp_key = self.progress.temp_key.as_str();
        let outcome = run_bounded(pending, self.config.workers, |index| load_node_shard(db, reader, index, temp_key)).await;

        let created: u64 = outcome.completed.values().sum();
        self.progress.node_shards_done.extend(outcome.completed.keys().copied());
        self.report.nodes_created += created;
        self.report.node_shards += outcome.completed.len();
        if let Some((_, e)) = outcome.error {
            return Err(self.fail(ImportPhase::LoadNodes, e));
        }
        self.completed(ImportPhase::LoadNodes);
        Ok(created)
    }

    // ========================================================================
    // LOAD_RELATIONSHIPS
    // ========================================================================

    /// Load every relationship shard not yet committed.
    ///
    /// Refused unless every node shard has committed.
    pub async fn load_relationships(&mut self) -> Result<u64> {
        self.expect_phase(ImportPhase::LoadNodes)?;
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::InvalidPhase { expected: ImportPhase::LoadNodes.to_string(), actual: self.phase.to_string() });
        };
        let node_shards = prepared.nodes.len();
        if self.progress.node_shards_done.len() != node_shards
            || !(0..node_shards).all(|i| self.progress.node_shards_done.contains(&i))
        {
            return Err(Error::InvalidPhase {
                expected: format!("all {node_shards} node shards committed"),
                actual: format!("{} committed", self.progress.node_shards_done.len()),
            });
        }

        let reader = &prepared.relationships;
        let pending: Vec<usize> =
            (0..reader.len()).filter(|i| !self.progress.relationship_shards_done.contains(i)).collect();
        tracing::info!(shards = reader.len(), pending = pending.len(), "loading relationship shards");

        let db = self.db;
        let temp_key = self.progress.temp_key.as_str();
        let outcome =
            run_bounded(pending, self.config.workers, |index| load_relationship_shard(db, reader, index, temp_key)).await;

        let created: u64 = outcome.completed.values().sum();
        self.progress.relationship_shards_done.extend(outcome.completed.keys().copied());
        self.report.relationships_created += created;
        self.report.relationship_shards += outcome.completed.len();
        if let Some((_, e)) = outcome.error {
            return Err(self.fail(ImportPhase::LoadRelationships, e));
        }
        self.completed(ImportPhase::LoadRelationships);
        Ok(created)
    }

    // ========================================================================
    // STRIP_TEMP_KEY -> REPLAY_CONSTRAINTS -> DONE
    // ========================================================================

    /// Remove the temp key, drop its constraints and replay the originals.
    pub async fn finish(&mut self) -> Result<ImportReport> {
        self.expect_phase(ImportPhase::LoadRelationships)?;
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::InvalidPhase {
                expected: ImportPhase::LoadRelationships.to_string(),
                actual: self.phase.to_string(),
            });
        };
        let (labels, constraints, dialect) =
            (prepared.manifest.node_labels.clone(), prepared.manifest.constraints.clone(), prepared.dialect);
        let temp_key = self.progress.temp_key.clone();

        let stripped = match self.strip_temp_key(&labels, &temp_key).await {
            Ok(stripped) => stripped,
            Err(e) => return Err(self.fail(ImportPhase::StripTempKey, e)),
        };
        tracing::info!(nodes = stripped, key = %temp_key, "temp key stripped");
        self.completed(ImportPhase::StripTempKey);

        if let Err(e) = schema::replay_constraints(self.db, dialect, &constraints).await {
            return Err(self.fail(ImportPhase::ReplayConstraints, e));
        }
        self.report.constraints_replayed = constraints.len();
        self.completed(ImportPhase::ReplayConstraints);

        self.completed(ImportPhase::Done);
        tracing::info!(
            nodes = self.report.nodes_created,
            relationships = self.report.relationships_created,
            constraints = self.report.constraints_replayed,
            "import complete"
        );
        Ok(self.report.clone())
    }

    async fn strip_temp_key(&self, labels: &BTreeSet<String>, temp_key: &str) -> Result<i64> {
        let stripped = self
            .db
            .run_auto(TxMode::ReadWrite, &statements::strip_temp_key(temp_key), PropertyMap::new())
            .await?
            .single()?
            .get::<i64>("stripped")?;
        schema::drop_temp_constraints(self.db, labels, temp_key).await?;
        Ok(stripped)
    }
}

// ============================================================================
// Shard loading
// ============================================================================

fn shard_name<T>(reader: &ShardReader<T>, index: usize) -> String {
    reader
        .path(index)
        .and_then(|p| p.file_name())
        .map_or_else(|| format!("{} shard {index}", reader.kind()), |n| n.to_string_lossy().into_owned())
}

/// One statement and the number of entities it must create.
#[derive(Debug)]
struct Batch {
    statement: String,
    params: PropertyMap,
    expected: usize,
}

impl Batch {
    fn rows(statement: String, rows: Vec<Value>) -> Self {
        let expected = rows.len();
        let mut params = PropertyMap::new();
        params.insert("rows".into(), Value::List(rows));
        Self { statement, params, expected }
    }
}

fn row(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
}

fn node_batches(nodes: Vec<DecodedNode>, temp_key: &str) -> Vec<Batch> {
    let mut grouped: BTreeMap<BTreeSet<String>, Vec<Value>> = BTreeMap::new();
    let mut batches = Vec::new();
    for node in nodes {
        let mut props = node.properties.values;
        props.insert(temp_key.to_owned(), Value::Int(node.source_id));
        if node.properties.literals.is_empty() {
            grouped.entry(node.labels).or_default().push(row([("props", Value::Map(props))]));
        } else {
            let mut params = PropertyMap::new();
            params.insert("props".into(), Value::Map(props));
            batches.push(Batch {
                statement: statements::create_node_with_literals(&node.labels, &node.properties.literals),
                params,
                expected: 1,
            });
        }
    }
    let mut out: Vec<Batch> =
        grouped.into_iter().map(|(labels, rows)| Batch::rows(statements::create_nodes(&labels), rows)).collect();
    out.extend(batches);
    out
}

type RelGroup = (BTreeSet<String>, BTreeSet<String>, String);

fn relationship_batches(rels: Vec<DecodedRelationship>, temp_key: &str) -> Vec<Batch> {
    let mut grouped: BTreeMap<RelGroup, Vec<Value>> = BTreeMap::new();
    let mut batches = Vec::new();
    for rel in rels {
        let props = Value::Map(rel.properties.values);
        if rel.properties.literals.is_empty() {
            grouped
                .entry((rel.start_labels, rel.end_labels, rel.rel_type))
                .or_default()
                .push(row([("start", Value::Int(rel.start_id)), ("end", Value::Int(rel.end_id)), ("props", props)]));
        } else {
            let mut params = PropertyMap::new();
            params.insert("start".into(), Value::Int(rel.start_id));
            params.insert("end".into(), Value::Int(rel.end_id));
            params.insert("props".into(), props);
            batches.push(Batch {
                statement: statements::create_relationship_with_literals(
                    &rel.start_labels,
                    &rel.end_labels,
                    &rel.rel_type,
                    temp_key,
                    &rel.properties.literals,
                ),
                params,
                expected: 1,
            });
        }
    }
    let mut out: Vec<Batch> = grouped
        .into_iter()
        .map(|((start, end, rel_type), rows)| {
            Batch::rows(statements::create_relationships(&start, &end, &rel_type, temp_key), rows)
        })
        .collect();
    out.extend(batches);
    out
}

/// Run `batches` in one write transaction; commit only if every count matches.
async fn apply_batches<E: QueryExecutor + ?Sized>(db: &E, shard: &str, batches: Vec<Batch>) -> Result<u64> {
    let mut tx = db.begin_tx(TxMode::ReadWrite).await?;
    let mut outcome = Ok(0u64);
    for batch in batches {
        let result = db.run(&mut tx, &batch.statement, batch.params).await.and_then(|r| {
            let created = r.single()?.get::<i64>("created")?;
            if usize::try_from(created).ok() != Some(batch.expected) {
                return Err(Error::Query(format!(
                    "expected {} entities, created {created}; endpoints missing or not unique",
                    batch.expected
                )));
            }
            Ok(created as u64)
        });
        match result {
            Ok(n) => outcome = outcome.map(|total| total + n),
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    finish_tx(db, tx, outcome)
        .await
        .map_err(|e| Error::ImportTransaction { shard: shard.to_owned(), source: Box::new(e) })
}

async fn load_node_shard<E: QueryExecutor + ?Sized>(
    db: &E,
    reader: &ShardReader<EncodedNode>,
    index: usize,
    temp_key: &str,
) -> Result<u64> {
    let shard = shard_name(reader, index);
    let encoded = reader.read_shard(index)?;
    let mut decoded = Vec::with_capacity(encoded.len());
    for (pos, record) in encoded.iter().enumerate() {
        let node = record.decode().map_err(|source| Error::Decoding {
            location: format!("{shard} record {pos} (node {})", record.node_id),
            source,
        })?;
        decoded.push(node);
    }
    let records = decoded.len();
    let created = apply_batches(db, &shard, node_batches(decoded, temp_key)).await?;
    tracing::info!(shard = %shard, records, "node shard committed");
    Ok(created)
}

async fn load_relationship_shard<E: QueryExecutor + ?Sized>(
    db: &E,
    reader: &ShardReader<EncodedRelationship>,
    index: usize,
    temp_key: &str,
) -> Result<u64> {
    let shard = shard_name(reader, index);
    let encoded = reader.read_shard(index)?;
    let mut decoded = Vec::with_capacity(encoded.len());
    for (pos, record) in encoded.iter().enumerate() {
        let rel = record.decode().map_err(|source| Error::Decoding {
            location: format!("{shard} record {pos} (relationship {})", record.rel_id),
            source,
        })?;
        decoded.push(rel);
    }
    let records = decoded.len();
    let created = apply_batches(db, &shard, relationship_batches(decoded, temp_key)).await?;
    tracing::info!(shard = %shard, records, "relationship shard committed");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::literal::LiteralExpr;
    use crate::codec::DecodedProperties;
    use crate::MemoryBackend;

    fn decoded_node(id: i64, labels: &[&str], literal: Option<&str>) -> DecodedNode {
        let mut properties = DecodedProperties::default();
        properties.values.insert("name".into(), Value::from(format!("n{id}")));
        if let Some(fragment) = literal {
            properties.literals.insert("at".into(), LiteralExpr::parse(fragment).unwrap());
        }
        DecodedNode { source_id: id, labels: labels.iter().map(|l| l.to_string()).collect(), properties }
    }

    #[test]
    fn test_node_batches_group_by_label_set() {
        let nodes = vec![
            decoded_node(0, &["A"], None),
            decoded_node(1, &["A"], None),
            decoded_node(2, &["B"], None),
            decoded_node(3, &["A"], Some("date('2020-01-01')")),
        ];
        let batches = node_batches(nodes, "tk");
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(|b| b.expected).sum::<usize>(), 4);
        let literal = batches.last().unwrap();
        assert!(literal.statement.contains("date('2020-01-01')"));
        let props = literal.params["props"].as_map().unwrap();
        assert_eq!(props["tk"], Value::Int(3));
    }

    #[test]
    fn test_first_gap() {
        let mut point = ResumePoint::new("k".into());
        assert_eq!(point.first_pending_node_shard(), 0);
        point.node_shards_done.extend([0, 1, 3]);
        assert_eq!(point.first_pending_node_shard(), 2);
        assert_eq!(point.first_pending_relationship_shard(), 0);
    }

    #[test]
    fn test_resume_point_serde() {
        let mut point = ResumePoint::new("abc".into());
        point.phase = ImportPhase::LoadNodes;
        point.node_shards_done.insert(0);
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["phase"], "LOAD_NODES");
        let back: ResumePoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, point);
    }

    #[tokio::test]
    async fn test_missing_endpoint_rolls_back_shard() {
        let db = MemoryBackend::new();
        let rel = DecodedRelationship {
            source_id: 0,
            start_id: 1,
            start_labels: BTreeSet::new(),
            end_id: 2,
            end_labels: BTreeSet::new(),
            rel_type: "R".into(),
            properties: DecodedProperties::default(),
        };
        let err = apply_batches(&db, "relationships_000000.json", relationship_batches(vec![rel], "tk"))
            .await
            .unwrap_err();
        match err {
            Error::ImportTransaction { shard, .. } => assert_eq!(shard, "relationships_000000.json"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.snapshot().relationship_count(), 0);
    }

    #[tokio::test]
    async fn test_phase_order_is_enforced() {
        let db = MemoryBackend::new();
        let mut importer = Importer::new(&db, ImportConfig::new("/nonexistent"));
        assert!(matches!(importer.load_nodes().await, Err(Error::InvalidPhase { .. })));
        assert!(matches!(importer.load_relationships().await, Err(Error::InvalidPhase { .. })));
        assert!(matches!(importer.finish().await, Err(Error::InvalidPhase { .. })));
        assert!(importer.prepare().await.is_err());
        assert_eq!(importer.phase(), ImportPhase::Failed);
        assert!(importer.resume_point().is_none());
    }
}
