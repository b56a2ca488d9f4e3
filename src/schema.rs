//! Schema snapshot, export manifest and temp-key handling.
//!
//! The manifest is a handful of small JSON files at the project root. They
//! are never compressed, so an operator can read them directly.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ImportConfig;
use crate::cypher::statements::{self, ConstraintDialect};
use crate::execution::QueryResult;
use crate::model::{ConstraintRecord, PropertyMap};
use crate::storage::{finish_tx, QueryExecutor};
use crate::tx::TxMode;
use crate::{Error, Result};

// ============================================================================
// Manifest
// ============================================================================

pub const COMPRESSED_FILE: &str = "compressed.json";
pub const DB_ID_FILE: &str = "db_id.json";
pub const DBMS_VERSION_FILE: &str = "dbms_version.json";
pub const NODE_LABELS_FILE: &str = "node_labels.json";
pub const REL_TYPES_FILE: &str = "rel_types.json";
pub const PROPERTY_KEYS_FILE: &str = "property_keys.json";
pub const CONSTRAINTS_FILE: &str = "uniqueness_constraints.json";
pub const TEMP_KEY_FILE: &str = "unique_prop_key.json";
pub const SHARDS_FILE: &str = "shards.json";

/// Every manifest file name.
pub const MANIFEST_FILES: [&str; 9] = [
    COMPRESSED_FILE,
    DB_ID_FILE,
    DBMS_VERSION_FILE,
    NODE_LABELS_FILE,
    REL_TYPES_FILE,
    PROPERTY_KEYS_FILE,
    CONSTRAINTS_FILE,
    TEMP_KEY_FILE,
    SHARDS_FILE,
];

/// Shard layout recorded in `shards.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCounts {
    pub indent_size: usize,
    pub nodes: usize,
    pub relationships: usize,
    pub node_records: u64,
    pub relationship_records: u64,
}

/// Everything the importer needs besides the shard files.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub db_id: String,
    pub dbms_version: String,
    pub compressed: bool,
    pub node_labels: BTreeSet<String>,
    pub rel_types: BTreeSet<String>,
    pub property_keys: BTreeSet<String>,
    pub constraints: Vec<ConstraintRecord>,
    /// Temporary unique property used to match relationship endpoints.
    pub temp_key: String,
    pub shards: ShardCounts,
}

impl Manifest {
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::ShardIo { path: dir.to_path_buf(), source: e })?;
        write_json(dir, COMPRESSED_FILE, &self.compressed)?;
        write_json(dir, DB_ID_FILE, &self.db_id)?;
        write_json(dir, DBMS_VERSION_FILE, &self.dbms_version)?;
        write_json(dir, NODE_LABELS_FILE, &self.node_labels)?;
        write_json(dir, REL_TYPES_FILE, &self.rel_types)?;
        write_json(dir, PROPERTY_KEYS_FILE, &self.property_keys)?;
        write_json(dir, CONSTRAINTS_FILE, &self.constraints)?;
        write_json(dir, TEMP_KEY_FILE, &self.temp_key)?;
        write_json(dir, SHARDS_FILE, &self.shards)?;
        tracing::info!(path = %dir.display(), "manifest written");
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let manifest = Self {
            compressed: read_json(dir, COMPRESSED_FILE)?,
            db_id: read_json(dir, DB_ID_FILE)?,
            dbms_version: read_json(dir, DBMS_VERSION_FILE)?,
            node_labels: read_json(dir, NODE_LABELS_FILE)?,
            rel_types: read_json(dir, REL_TYPES_FILE)?,
            property_keys: read_json(dir, PROPERTY_KEYS_FILE)?,
            constraints: read_json(dir, CONSTRAINTS_FILE)?,
            temp_key: read_json(dir, TEMP_KEY_FILE)?,
            shards: read_json(dir, SHARDS_FILE)?,
        };
        if manifest.temp_key.is_empty() {
            return Err(Error::SchemaConflict(format!(
                "{} in {} holds an empty key",
                TEMP_KEY_FILE,
                dir.display()
            )));
        }
        Ok(manifest)
    }

    /// True if `dir` holds at least one manifest file.
    pub fn present(dir: &Path) -> bool {
        MANIFEST_FILES.iter().any(|f| dir.join(f).exists())
    }
}

fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = dir.join(name);
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::ShardFormat { path: path.clone(), source: e })?;
    fs::write(&path, text).map_err(|e| Error::ShardIo { path, source: e })
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let text = fs::read_to_string(&path).map_err(|e| Error::ShardIo { path: path.clone(), source: e })?;
    serde_json::from_str(&text).map_err(|e| Error::ShardFormat { path, source: e })
}

// ============================================================================
// Snapshot
// ============================================================================

/// Schema and identity of a live database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    pub db_id: String,
    pub dbms_version: String,
    pub labels: BTreeSet<String>,
    pub rel_types: BTreeSet<String>,
    pub property_keys: BTreeSet<String>,
    pub constraints: Vec<ConstraintRecord>,
    /// Names of every constraint, including kinds that are not exported.
    pub constraint_names: BTreeSet<String>,
    pub node_count: i64,
}

impl SchemaSnapshot {
    /// Read the schema inside one read-only transaction.
    ///
    /// With `pull_constraints` false the constraint list is left empty but
    /// constraint names are still read, since temp-key checks need them.
    pub async fn capture<E: QueryExecutor + ?Sized>(db: &E, pull_constraints: bool) -> Result<Self> {
        let mut tx = db.begin_tx(TxMode::ReadOnly).await?;
        let info = db.run(&mut tx, statements::DB_INFO, PropertyMap::new()).await;
        let snapshot = match info {
            Ok(info) => Self::capture_rest(db, &mut tx, info, pull_constraints).await,
            Err(e) => Err(e),
        };
        let snapshot = finish_tx(db, tx, snapshot).await?;
        tracing::info!(
            db_id = %snapshot.db_id,
            version = %snapshot.dbms_version,
            labels = snapshot.labels.len(),
            rel_types = snapshot.rel_types.len(),
            property_keys = snapshot.property_keys.len(),
            constraints = snapshot.constraints.len(),
            nodes = snapshot.node_count,
            "schema captured"
        );
        Ok(snapshot)
    }

    async fn capture_rest<E: QueryExecutor + ?Sized>(
        db: &E,
        tx: &mut E::Tx,
        info: QueryResult,
        pull_constraints: bool,
    ) -> Result<Self> {
        let db_id: String = info.single()?.get("id")?;

        let components = db.run(tx, statements::COMPONENTS, PropertyMap::new()).await?;
        let dbms_version = components
            .rows
            .iter()
            .find(|row| row.get::<String>("name").is_ok_and(|n| n == "Neo4j Kernel"))
            .or_else(|| components.rows.first())
            .map(|row| row.get::<Vec<String>>("versions"))
            .transpose()?
            .and_then(|versions| versions.into_iter().next())
            .unwrap_or_default();

        let labels = string_column(db.run(tx, statements::LABELS, PropertyMap::new()).await?, "label")?;
        let rel_types = string_column(
            db.run(tx, statements::RELATIONSHIP_TYPES, PropertyMap::new()).await?,
            "relationshipType",
        )?;
        let property_keys = string_column(
            db.run(tx, statements::PROPERTY_KEYS, PropertyMap::new()).await?,
            "propertyKey",
        )?;

        let shown = db.run(tx, statements::SHOW_CONSTRAINTS, PropertyMap::new()).await?;
        let constraint_names = string_column(shown.clone(), "name")?;
        let constraints = if pull_constraints { uniqueness_constraints(&shown)? } else { Vec::new() };

        let node_count = db
            .run(tx, statements::COUNT_NODES, PropertyMap::new())
            .await?
            .single()?
            .get::<i64>("count")?;

        Ok(Self {
            db_id,
            dbms_version,
            labels,
            rel_types,
            property_keys,
            constraints,
            constraint_names,
            node_count,
        })
    }

    pub fn dialect(&self) -> ConstraintDialect {
        ConstraintDialect::for_version(&self.dbms_version)
    }

    /// Property keys and constraint names, the names a temp key must avoid.
    pub fn reserved_names(&self) -> BTreeSet<String> {
        self.property_keys.iter().chain(&self.constraint_names).cloned().collect()
    }
}

fn string_column(result: QueryResult, column: &str) -> Result<BTreeSet<String>> {
    result.rows.iter().map(|row| row.get::<String>(column)).collect()
}

/// Single-property node uniqueness constraints, one per (label, property).
fn uniqueness_constraints(shown: &QueryResult) -> Result<Vec<ConstraintRecord>> {
    let mut out: Vec<ConstraintRecord> = Vec::new();
    for row in &shown.rows {
        let kind: String = row.get("type")?;
        let entity: Option<String> = row.get("entityType").unwrap_or(None);
        if !matches!(kind.as_str(), "UNIQUENESS" | "NODE_PROPERTY_UNIQUENESS")
            || entity.as_deref().is_some_and(|e| e != "NODE")
        {
            continue;
        }
        let name: String = row.get("name")?;
        let labels: Vec<String> = row.get("labelsOrTypes")?;
        let properties: Vec<String> = row.get("properties")?;
        let ([label], [property]) = (labels.as_slice(), properties.as_slice()) else {
            tracing::warn!(constraint = %name, "skipping composite uniqueness constraint");
            continue;
        };
        if out.iter().any(|c| &c.label == label && &c.property == property) {
            continue;
        }
        out.push(ConstraintRecord::new(label.clone(), property.clone(), name));
    }
    out.sort();
    Ok(out)
}

// ============================================================================
// Temp key
// ============================================================================

pub const TEMP_KEY_LEN: usize = 16;
pub const DEFAULT_TEMP_KEY_ATTEMPTS: usize = 64;

/// One random candidate: `TEMP_KEY_LEN` lowercase ASCII letters.
pub fn generate_candidate<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TEMP_KEY_LEN).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect()
}

/// Draw candidates until one is absent (case-insensitively) from `avoid`.
///
/// Fails with `SchemaConflict` after `max_attempts` collisions.
pub fn allocate_temp_key<R: Rng + ?Sized>(
    avoid: &BTreeSet<String>,
    rng: &mut R,
    max_attempts: usize,
) -> Result<String> {
    let taken: HashSet<String> = avoid.iter().map(|k| k.to_lowercase()).collect();
    for attempt in 1..=max_attempts {
        let candidate = generate_candidate(rng);
        if !taken.contains(&candidate) {
            tracing::debug!(attempt, key = %candidate, "temp key allocated");
            return Ok(candidate);
        }
    }
    Err(Error::SchemaConflict(format!(
        "no unused temporary property key found after {max_attempts} attempts"
    )))
}

fn collides(key: &str, names: &BTreeSet<String>) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(key))
}

/// Check an import target against the manifest and return the temp key to use.
///
/// The source database itself and non-empty targets are refused unless
/// `assume_yes` is set. A temp key already present in the target is a
/// `SchemaConflict`, or with `allow_temp_key_overwrite` a fresh key that
/// avoids both the manifest's and the target's names.
pub fn validate_target<R: Rng + ?Sized>(
    manifest: &Manifest,
    target: &SchemaSnapshot,
    config: &ImportConfig,
    rng: &mut R,
) -> Result<String> {
    if target.db_id == manifest.db_id {
        if !config.assume_yes {
            return Err(Error::Aborted(format!(
                "target database {} is the exported source",
                target.db_id
            )));
        }
        tracing::warn!(db_id = %target.db_id, "importing into the source database");
    }

    if target.node_count > 0 {
        if !config.assume_yes {
            return Err(Error::Aborted(format!(
                "target database holds {} nodes; importing would likely create duplicates",
                target.node_count
            )));
        }
        tracing::warn!(nodes = target.node_count, "importing into a non-empty database");
    }

    let reserved = target.reserved_names();
    if !collides(&manifest.temp_key, &reserved) {
        return Ok(manifest.temp_key.clone());
    }
    if !config.allow_temp_key_overwrite {
        return Err(Error::SchemaConflict(format!(
            "temporary key '{}' already exists in the target",
            manifest.temp_key
        )));
    }
    let avoid: BTreeSet<String> = reserved
        .into_iter()
        .chain(manifest.property_keys.iter().cloned())
        .chain(std::iter::once(manifest.temp_key.clone()))
        .collect();
    let key = allocate_temp_key(&avoid, rng, config.temp_key_attempts)?;
    tracing::warn!(old = %manifest.temp_key, new = %key, "temp key taken in target, reallocated");
    Ok(key)
}

// ============================================================================
// Constraint DDL
// ============================================================================

pub fn temp_constraint_name(label: &str, temp_key: &str) -> String {
    format!("{label}_{temp_key}")
}

/// Run each schema statement in its own write transaction.
async fn run_schema<E: QueryExecutor + ?Sized>(db: &E, statements: Vec<String>) -> Result<()> {
    for statement in statements {
        tracing::debug!(%statement, "schema statement");
        db.run_auto(TxMode::ReadWrite, &statement, PropertyMap::new()).await?;
    }
    Ok(())
}

/// One temp-key uniqueness constraint per label.
pub async fn create_temp_constraints<E: QueryExecutor + ?Sized>(
    db: &E,
    dialect: ConstraintDialect,
    labels: &BTreeSet<String>,
    temp_key: &str,
) -> Result<()> {
    let ddl = labels
        .iter()
        .map(|label| {
            statements::create_unique_constraint(dialect, &temp_constraint_name(label, temp_key), label, temp_key, true)
        })
        .collect();
    run_schema(db, ddl).await
}

pub async fn drop_temp_constraints<E: QueryExecutor + ?Sized>(
    db: &E,
    labels: &BTreeSet<String>,
    temp_key: &str,
) -> Result<()> {
    let ddl = labels
        .iter()
        .map(|label| statements::drop_constraint(&temp_constraint_name(label, temp_key)))
        .collect();
    run_schema(db, ddl).await
}

/// Recreate the exported uniqueness constraints under their original names.
pub async fn replay_constraints<E: QueryExecutor + ?Sized>(
    db: &E,
    dialect: ConstraintDialect,
    constraints: &[ConstraintRecord],
) -> Result<()> {
    let ddl = constraints
        .iter()
        .map(|c| statements::create_unique_constraint(dialect, &c.constraint_name, &c.label, &c.property, true))
        .collect();
    run_schema(db, ddl).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use crate::Value;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn manifest() -> Manifest {
        Manifest {
            db_id: "source".into(),
            dbms_version: "5.13.0".into(),
            compressed: true,
            node_labels: ["Person".to_string()].into(),
            rel_types: ["KNOWS".to_string()].into(),
            property_keys: ["name".to_string()].into(),
            constraints: vec![ConstraintRecord::new("Person", "name", "person_name")],
            temp_key: "abcdefghijklmnop".into(),
            shards: ShardCounts { indent_size: 2, nodes: 1, relationships: 1, node_records: 2, relationship_records: 1 },
        }
    }

    #[test]
    fn test_manifest_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!Manifest::present(tmp.path()));
        manifest().write(tmp.path()).unwrap();
        assert!(Manifest::present(tmp.path()));
        assert_eq!(Manifest::read(tmp.path()).unwrap(), manifest());
        let raw = fs::read_to_string(tmp.path().join(TEMP_KEY_FILE)).unwrap();
        assert_eq!(raw, "\"abcdefghijklmnop\"");
    }

    #[test]
    fn test_missing_manifest_file() {
        let tmp = tempfile::tempdir().unwrap();
        manifest().write(tmp.path()).unwrap();
        fs::remove_file(tmp.path().join(DB_ID_FILE)).unwrap();
        assert!(matches!(Manifest::read(tmp.path()), Err(Error::ShardIo { .. })));
    }

    #[test]
    fn test_candidate_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let key = generate_candidate(&mut rng);
        assert_eq!(key.len(), TEMP_KEY_LEN);
        assert!(key.bytes().all(|b| b.is_ascii_lowercase()));
    }

    #[test]
    fn test_allocation_avoids_existing_keys() {
        let mut rng = StdRng::seed_from_u64(1);
        let avoid: BTreeSet<String> = (0..1000).map(|_| generate_candidate(&mut rng)).collect();
        let key = allocate_temp_key(&avoid, &mut rng, DEFAULT_TEMP_KEY_ATTEMPTS).unwrap();
        assert!(!avoid.contains(&key));
    }

    #[test]
    fn test_allocation_is_case_insensitive_and_bounded() {
        // Replaying the same seed reproduces the candidates the allocator will draw.
        let mut probe = StdRng::seed_from_u64(42);
        let avoid: BTreeSet<String> = (0..3).map(|_| generate_candidate(&mut probe).to_uppercase()).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let err = allocate_temp_key(&avoid, &mut rng, 3).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict(_)));

        let mut rng = StdRng::seed_from_u64(42);
        let key = allocate_temp_key(&avoid, &mut rng, 4).unwrap();
        assert_eq!(key.len(), TEMP_KEY_LEN);
    }

    fn target(db_id: &str, node_count: i64, keys: &[&str]) -> SchemaSnapshot {
        SchemaSnapshot {
            db_id: db_id.into(),
            node_count,
            property_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..SchemaSnapshot::default()
        }
    }

    #[test]
    fn test_validate_target_rules() {
        let m = manifest();
        let cfg = ImportConfig::new("/tmp/x");
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(validate_target(&m, &target("t", 0, &[]), &cfg, &mut rng).unwrap(), m.temp_key);
        assert!(matches!(
            validate_target(&m, &target("source", 0, &[]), &cfg, &mut rng),
            Err(Error::Aborted(_))
        ));
        assert!(matches!(
            validate_target(&m, &target("t", 5, &[]), &cfg, &mut rng),
            Err(Error::Aborted(_))
        ));
        let yes = cfg.clone().with_assume_yes(true);
        assert!(validate_target(&m, &target("t", 5, &[]), &yes, &mut rng).is_ok());

        let taken = target("t", 0, &["ABCDEFGHIJKLMNOP"]);
        assert!(matches!(
            validate_target(&m, &taken, &cfg, &mut rng),
            Err(Error::SchemaConflict(_))
        ));
        let overwrite = cfg.with_allow_temp_key_overwrite(true);
        let fresh = validate_target(&m, &taken, &overwrite, &mut rng).unwrap();
        assert_ne!(fresh, m.temp_key);
        assert!(!m.property_keys.contains(&fresh));
    }

    #[tokio::test]
    async fn test_capture_reads_schema() {
        let db = MemoryBackend::with_version("4.4.0");
        let mut props = PropertyMap::new();
        props.insert("name".into(), Value::from("Ada"));
        let a = db.insert_node(["Person"], props).unwrap();
        let b = db.insert_node(["City"], PropertyMap::new()).unwrap();
        db.insert_relationship(a, b, "LIVES_IN", PropertyMap::new()).unwrap();
        db.add_unique_constraint("person_name", "Person", "name").unwrap();

        let snap = SchemaSnapshot::capture(&db, true).await.unwrap();
        assert_eq!(snap.db_id, db.db_id());
        assert_eq!(snap.dbms_version, "4.4.0");
        assert_eq!(snap.dialect(), ConstraintDialect::Assert);
        assert_eq!(snap.labels, ["City".to_string(), "Person".to_string()].into());
        assert_eq!(snap.rel_types, ["LIVES_IN".to_string()].into());
        assert!(snap.property_keys.contains("name"));
        assert_eq!(snap.constraints, vec![ConstraintRecord::new("Person", "name", "person_name")]);
        assert_eq!(snap.node_count, 2);

        let without = SchemaSnapshot::capture(&db, false).await.unwrap();
        assert!(without.constraints.is_empty());
        assert!(without.constraint_names.contains("person_name"));
    }

    #[tokio::test]
    async fn test_temp_constraints_lifecycle() {
        let db = MemoryBackend::new();
        let labels: BTreeSet<String> = ["A".to_string(), "B".to_string()].into();
        create_temp_constraints(&db, ConstraintDialect::Require, &labels, "tmpkey").await.unwrap();
        // idempotent
        create_temp_constraints(&db, ConstraintDialect::Require, &labels, "tmpkey").await.unwrap();
        assert_eq!(db.snapshot().constraints().count(), 2);
        drop_temp_constraints(&db, &labels, "tmpkey").await.unwrap();
        assert_eq!(db.snapshot().constraints().count(), 0);

        replay_constraints(&db, ConstraintDialect::Assert, &[ConstraintRecord::new("A", "k", "a_k")])
            .await
            .unwrap();
        assert_eq!(db.snapshot().constraints().next().unwrap().name, "a_k");
    }
}
