//! # neo4j-backup: portable Neo4j property graph export/import
//!
//! Dumps every node, relationship, label, type, property and uniqueness
//! constraint of a graph into sharded JSON files and rebuilds the graph in
//! another database using nothing but plain Cypher.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `QueryExecutor` is the only contract with the database
//! 2. **Exhaustive codec**: every `Value` variant is matched at encode and decode
//! 3. **Shard atomicity**: one shard, one transaction, committed or rolled back
//! 4. **Node barrier**: relationships load only after every node shard commits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neo4j_backup::{ExportConfig, Extractor, ImportConfig, Importer, MemoryBackend};
//!
//! # async fn example() -> neo4j_backup::Result<()> {
//! let source = MemoryBackend::new();
//! let target = MemoryBackend::new();
//!
//! let export = Extractor::new(&source, ExportConfig::new("/tmp/graph-dump").with_compress(true))
//!     .run()
//!     .await?;
//!
//! let import = Importer::new(&target, ImportConfig::new(&export.project_dir))
//!     .run()
//!     .await?;
//! assert_eq!(import.nodes_created, export.node_records);
//! # Ok(())
//! # }
//! ```
//!
//! ## Executors
//!
//! | Executor | Description |
//! |----------|-------------|
//! | `MemoryBackend` | In-memory graph with snapshot transactions, for tests/embedding |
//! | your own | Implement `QueryExecutor` over a Bolt driver |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cypher;
pub mod execution;
pub mod storage;
pub mod tx;
pub mod codec;
pub mod shard;
pub mod schema;
pub mod config;
pub mod pool;
pub mod extract;
pub mod import;

use std::path::PathBuf;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap, NodeId, RelId,
    NodeRecord, RelationshipRecord, ConstraintRecord,
    Temporal, TemporalKind, IsoDuration, Point, Crs,
};

// ============================================================================
// Re-exports: Executor
// ============================================================================

pub use storage::{QueryExecutor, MemoryBackend};
pub use tx::{Transaction, TxMode, TxId};
pub use execution::{QueryResult, ResultRow, FromValue};

// ============================================================================
// Re-exports: Pipelines
// ============================================================================

pub use codec::CodecError;
pub use config::{ExportConfig, ImportConfig};
pub use extract::{Extractor, ExportPhase, ExportReport};
pub use import::{Importer, ImportPhase, ImportReport, ResumePoint};
pub use schema::Manifest;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The executor could not be reached. Never retried inside the crate.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Temp key already used by the target, key space exhausted, or an
    /// export directory/target that must not be touched.
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Encoding error in {record}: {source}")]
    Encoding {
        record: String,
        #[source]
        source: CodecError,
    },

    /// Includes hash mismatches, which mean tampering or a codec defect.
    #[error("Decoding error at {location}: {source}")]
    Decoding {
        location: String,
        #[source]
        source: CodecError,
    },

    #[error("Shard I/O error on {path:?}: {source}")]
    ShardIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed shard {path:?}: {source}")]
    ShardFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Missing, extra or non-contiguous shard files.
    #[error("Inconsistent shard set in {dir:?}: {message}")]
    ShardSet { dir: PathBuf, message: String },

    /// A shard transaction failed and was rolled back. Earlier shards stay committed.
    #[error("Import transaction failed for {shard}: {source}")]
    ImportTransaction {
        shard: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Cypher syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// An operation was attempted out of pipeline order.
    #[error("Invalid phase: expected {expected}, currently {actual}")]
    InvalidPhase { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A safety check refused to continue without explicit confirmation.
    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
