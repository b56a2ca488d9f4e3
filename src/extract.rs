//! Export pipeline: schema snapshot, paginated scan, sharded output, manifest.
//!
//! The source database is only ever read. A failure at any point aborts the
//! export and leaves whatever was written on disk for inspection.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::codec::record::{EncodedNode, EncodedRelationship};
use crate::config::ExportConfig;
use crate::cypher::statements;
use crate::execution::QueryResult;
use crate::model::{NodeRecord, PropertyMap, RelationshipRecord, Value};
use crate::schema::{self, Manifest, SchemaSnapshot, ShardCounts};
use crate::shard::{ShardKind, ShardSummary, ShardWriter};
use crate::storage::QueryExecutor;
use crate::tx::TxMode;
use crate::{Error, Result};

// ============================================================================
// Phases
// ============================================================================

/// Export state machine. Each phase is entered only from its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Init,
    SnapshotSchema,
    AllocateTempKey,
    ScanNodes,
    ScanRelationships,
    WriteManifest,
    Done,
    Failed,
}

impl ExportPhase {
    fn predecessor(self) -> Option<ExportPhase> {
        use ExportPhase::*;
        match self {
            Init | Failed => None,
            SnapshotSchema => Some(Init),
            AllocateTempKey => Some(SnapshotSchema),
            ScanNodes => Some(AllocateTempKey),
            ScanRelationships => Some(ScanNodes),
            WriteManifest => Some(ScanRelationships),
            Done => Some(WriteManifest),
        }
    }
}

impl fmt::Display for ExportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportPhase::Init => "INIT",
            ExportPhase::SnapshotSchema => "SNAPSHOT_SCHEMA",
            ExportPhase::AllocateTempKey => "ALLOCATE_TEMP_KEY",
            ExportPhase::ScanNodes => "SCAN_NODES",
            ExportPhase::ScanRelationships => "SCAN_RELATIONSHIPS",
            ExportPhase::WriteManifest => "WRITE_MANIFEST",
            ExportPhase::Done => "DONE",
            ExportPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Result of a finished export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub project_dir: PathBuf,
    pub node_records: u64,
    pub relationship_records: u64,
    pub node_shards: usize,
    pub relationship_shards: usize,
    pub temp_key: String,
}

// ============================================================================
// Extractor
// ============================================================================

/// Names seen while scanning, merged into the manifest afterwards.
#[derive(Debug, Default)]
struct Observed {
    labels: BTreeSet<String>,
    rel_types: BTreeSet<String>,
    property_keys: BTreeSet<String>,
}

impl Observed {
    fn keys(&mut self, props: &PropertyMap, temp_key: &str, record: &str) -> Result<()> {
        for key in props.keys() {
            if key.eq_ignore_ascii_case(temp_key) {
                return Err(Error::SchemaConflict(format!(
                    "{record} carries property '{key}', which collides with temp key '{temp_key}'"
                )));
            }
            if !self.property_keys.contains(key) {
                self.property_keys.insert(key.clone());
            }
        }
        Ok(())
    }
}

pub struct Extractor<'a, E: QueryExecutor + ?Sized> {
    db: &'a E,
    config: ExportConfig,
    phase: ExportPhase,
    rng: StdRng,
}

impl<'a, E: QueryExecutor + ?Sized> Extractor<'a, E> {
    pub fn new(db: &'a E, config: ExportConfig) -> Self {
        Self { db, config, phase: ExportPhase::Init, rng: StdRng::from_os_rng() }
    }

    /// Use a fixed randomness source for temp-key allocation.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    fn enter(&mut self, next: ExportPhase) -> Result<()> {
        if next.predecessor() != Some(self.phase) {
            return Err(Error::InvalidPhase {
                expected: next.predecessor().map_or_else(|| "none".to_string(), |p| p.to_string()),
                actual: self.phase.to_string(),
            });
        }
        tracing::info!(phase = %next, "export phase");
        self.phase = next;
        Ok(())
    }

    /// Run the whole export.
    pub async fn run(&mut self) -> Result<ExportReport> {
        match self.run_phases().await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(phase = %self.phase, error = %e, "export failed");
                self.phase = ExportPhase::Failed;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<ExportReport> {
        if self.phase != ExportPhase::Init {
            return Err(Error::InvalidPhase { expected: ExportPhase::Init.to_string(), actual: self.phase.to_string() });
        }
        self.config.validate()?;
        self.db.run_auto(TxMode::ReadOnly, statements::PING, PropertyMap::new()).await?;

        self.enter(ExportPhase::SnapshotSchema)?;
        let snapshot = SchemaSnapshot::capture(self.db, self.config.pull_uniqueness_constraints).await?;
        if snapshot.node_count == 0 {
            return Err(Error::Aborted("source database holds no nodes, nothing to export".into()));
        }
        prepare_project_dir(&self.config.project_dir, self.config.assume_yes)?;

        self.enter(ExportPhase::AllocateTempKey)?;
        let temp_key = schema::allocate_temp_key(&snapshot.reserved_names(), &mut self.rng, self.config.temp_key_attempts)?;
        tracing::info!(key = %temp_key, "temp key allocated");

        let mut observed = Observed::default();

        self.enter(ExportPhase::ScanNodes)?;
        let nodes = self.scan_nodes(&temp_key, &mut observed).await?;

        self.enter(ExportPhase::ScanRelationships)?;
        let relationships = self.scan_relationships(&temp_key, &mut observed).await?;

        self.enter(ExportPhase::WriteManifest)?;
        let manifest = Manifest {
            db_id: snapshot.db_id,
            dbms_version: snapshot.dbms_version,
            compressed: self.config.compress,
            node_labels: snapshot.labels.into_iter().chain(observed.labels).collect(),
            rel_types: snapshot.rel_types.into_iter().chain(observed.rel_types).collect(),
            property_keys: snapshot.property_keys.into_iter().chain(observed.property_keys).collect(),
            constraints: snapshot.constraints,
            temp_key: temp_key.clone(),
            shards: ShardCounts {
                indent_size: self.config.indent_size,
                nodes: nodes.shards,
                relationships: relationships.shards,
                node_records: nodes.records,
                relationship_records: relationships.records,
            },
        };
        manifest.write(&self.config.project_dir)?;

        self.enter(ExportPhase::Done)?;
        tracing::info!(
            nodes = nodes.records,
            relationships = relationships.records,
            node_shards = nodes.shards,
            relationship_shards = relationships.shards,
            path = %self.config.project_dir.display(),
            "export complete"
        );
        Ok(ExportReport {
            project_dir: self.config.project_dir.clone(),
            node_records: nodes.records,
            relationship_records: relationships.records,
            node_shards: nodes.shards,
            relationship_shards: relationships.shards,
            temp_key,
        })
    }

    fn writer<T: serde::Serialize>(&self, kind: ShardKind) -> ShardWriter<T> {
        ShardWriter::new(
            self.config.data_dir(),
            kind,
            self.config.compress,
            self.config.indent_size,
            self.config.shard_size_bytes,
        )
    }

    /// Fetch one keyset page in its own read-only transaction.
    async fn page(&self, statement: &str, after: i64) -> Result<QueryResult> {
        let mut params = PropertyMap::new();
        params.insert("after".into(), Value::Int(after));
        params.insert("limit".into(), Value::Int(page_limit(self.config.page_size)));
        self.db.run_auto(TxMode::ReadOnly, statement, params).await
    }

    async fn scan_nodes(&self, temp_key: &str, observed: &mut Observed) -> Result<ShardSummary> {
        let mut writer = self.writer::<EncodedNode>(ShardKind::Nodes);
        let mut after = -1;
        loop {
            let page = self.page(statements::NODE_PAGE, after).await?;
            let fetched = page.rows.len();
            for row in &page.rows {
                let id: i64 = row.get("id")?;
                let labels: Vec<String> = row.get("labels")?;
                let properties: PropertyMap = row.get("props")?;
                let context = format!("node {id}");
                observed.keys(&properties, temp_key, &context)?;
                observed.labels.extend(labels.iter().cloned());

                let record = NodeRecord { source_id: id, labels: labels.into_iter().collect(), properties };
                let encoded = EncodedNode::encode(&record).map_err(|source| Error::Encoding { record: context, source })?;
                writer.push(&encoded)?;
                after = id;
            }
            tracing::debug!(records = fetched, after, "node page scanned");
            if fetched < self.config.page_size {
                break;
            }
        }
        writer.finish()
    }

    async fn scan_relationships(&self, temp_key: &str, observed: &mut Observed) -> Result<ShardSummary> {
        let mut writer = self.writer::<EncodedRelationship>(ShardKind::Relationships);
        let mut after = -1;
        loop {
            let page = self.page(statements::RELATIONSHIP_PAGE, after).await?;
            let fetched = page.rows.len();
            for row in &page.rows {
                let id: i64 = row.get("id")?;
                let rel_type: String = row.get("type")?;
                let start_labels: Vec<String> = row.get("start_labels")?;
                let end_labels: Vec<String> = row.get("end_labels")?;
                let properties: PropertyMap = row.get("props")?;
                let context = format!("relationship {id}");
                observed.keys(&properties, temp_key, &context)?;
                observed.rel_types.insert(rel_type.clone());

                let record = RelationshipRecord {
                    id,
                    start_id: row.get("start_id")?,
                    start_labels: start_labels.into_iter().collect(),
                    end_id: row.get("end_id")?,
                    end_labels: end_labels.into_iter().collect(),
                    rel_type,
                    properties,
                };
                let encoded =
                    EncodedRelationship::encode(&record).map_err(|source| Error::Encoding { record: context, source })?;
                writer.push(&encoded)?;
                after = id;
            }
            tracing::debug!(records = fetched, after, "relationship page scanned");
            if fetched < self.config.page_size {
                break;
            }
        }
        writer.finish()
    }
}

fn page_limit(page_size: usize) -> i64 {
    i64::try_from(page_size).unwrap_or(i64::MAX)
}

/// Make sure `dir` can receive a fresh export.
///
/// A missing directory is created. An existing one is refused unless
/// `assume_yes` is set, and even then only if it is empty or holds a
/// previous export, whose files are removed.
fn prepare_project_dir(dir: &Path, assume_yes: bool) -> Result<()> {
    if dir.exists() {
        let mut entries = fs::read_dir(dir)?;
        let empty = entries.next().is_none();
        if !empty {
            if !assume_yes {
                return Err(Error::Aborted(format!("export directory {} already exists", dir.display())));
            }
            let data = dir.join("data");
            if !Manifest::present(dir) && !data.is_dir() {
                return Err(Error::Aborted(format!(
                    "{} is not empty and does not hold a previous export",
                    dir.display()
                )));
            }
            tracing::warn!(path = %dir.display(), "replacing previous export");
            for name in schema::MANIFEST_FILES {
                let path = dir.join(name);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            if data.is_dir() {
                fs::remove_dir_all(&data)?;
            }
        }
    }
    let data = dir.join("data");
    fs::create_dir_all(&data)?;
    Ok(())
}
