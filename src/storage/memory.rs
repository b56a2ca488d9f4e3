//! In-memory executor.
//!
//! This is the reference implementation of `QueryExecutor`. The committed
//! graph is an immutable `Arc<GraphState>` snapshot:
//!
//! - **Reads** see the snapshot taken at `begin_tx`.
//! - **Writes** copy the snapshot on first mutation; `commit_tx` publishes
//!   the copy and `rollback_tx` drops it.
//! - **Writers are serialized**: a `ReadWrite` transaction holds the writer
//!   lock until it is committed or rolled back.
//! - A statement error terminates the transaction; it can only be rolled back.
//!
//! `disconnect()` makes every call fail with `Error::Connectivity`, which is
//! how tests simulate an unreachable server.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::execution::{self, GraphState, QueryResult, ServerInfo};
use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode};
use crate::{Error, Result};
use super::QueryExecutor;

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph database.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    committed: RwLock<Arc<GraphState>>,
    writer: Arc<Mutex<()>>,
    server: ServerInfo,
    connected: AtomicBool,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    /// A 5.x server with a random database id.
    pub fn new() -> Self {
        Self::with_version("5.13.0")
    }

    /// Report `version` from `dbms.components()`. The major version decides
    /// which constraint syntax the importer emits.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                committed: RwLock::new(Arc::new(GraphState::default())),
                writer: Arc::new(Mutex::new(())),
                server: ServerInfo {
                    db_id: format!("{:032x}", rand::random::<u128>()),
                    db_name: "neo4j".into(),
                    version: version.into(),
                    edition: "community".into(),
                },
                connected: AtomicBool::new(true),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn db_id(&self) -> &str {
        &self.inner.server.db_id
    }

    pub fn version(&self) -> &str {
        &self.inner.server.version
    }

    /// Fail every subsequent call with `Error::Connectivity`.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
    }

    /// The committed graph.
    pub fn snapshot(&self) -> Arc<GraphState> {
        Arc::clone(&self.inner.committed.read())
    }

    fn check_connected(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connectivity("in-memory server is disconnected".into()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Seeding (applied directly to the committed graph)
// ============================================================================

impl MemoryBackend {
    /// Must not be called while a write transaction is open; its commit
    /// would overwrite the change.
    pub fn insert_node<L, S>(&self, labels: L, props: PropertyMap) -> Result<NodeId>
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: BTreeSet<String> = labels.into_iter().map(Into::into).collect();
        let mut committed = self.inner.committed.write();
        Arc::make_mut(&mut committed).create_node(labels, props)
    }

    pub fn insert_relationship(
        &self,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        let mut committed = self.inner.committed.write();
        Arc::make_mut(&mut committed).create_relationship(src, dst, rel_type, props)
    }

    pub fn add_unique_constraint(&self, name: &str, label: &str, property: &str) -> Result<()> {
        let mut committed = self.inner.committed.write();
        Arc::make_mut(&mut committed).create_unique_constraint(Some(name.to_owned()), label, property, false)?;
        Ok(())
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Snapshot transaction.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    graph: Arc<GraphState>,
    failed: bool,
    _writer: Option<OwnedMutexGuard<()>>,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

impl std::fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTx")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("failed", &self.failed)
            .finish()
    }
}

// ============================================================================
// QueryExecutor impl
// ============================================================================

#[async_trait]
impl QueryExecutor for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        self.check_connected()?;
        let writer = match mode {
            TxMode::ReadWrite => Some(Arc::clone(&self.inner.writer).lock_owned().await),
            TxMode::ReadOnly => None,
        };
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        let graph = self.snapshot();
        tracing::trace!(tx = %id, ?mode, "begin");
        Ok(MemoryTx { id, mode, graph, failed: false, _writer: writer })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        self.check_connected()?;
        if tx.failed {
            return Err(Error::Query(format!(
                "Transaction {} has failed and can not be committed",
                tx.id
            )));
        }
        if tx.mode == TxMode::ReadWrite {
            *self.inner.committed.write() = tx.graph;
        }
        tracing::trace!(tx = %tx.id, "commit");
        Ok(())
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        tracing::trace!(tx = %tx.id, "rollback");
        Ok(())
    }

    async fn run(&self, tx: &mut MemoryTx, statement: &str, params: PropertyMap) -> Result<QueryResult> {
        self.check_connected()?;
        if tx.failed {
            return Err(Error::Query(format!("Transaction {} has been terminated", tx.id)));
        }
        let writable = tx.is_writable();
        let result = execution::execute(&mut tx.graph, writable, &self.inner.server, statement, &params);
        if result.is_err() {
            tx.failed = true;
        }
        result
    }
}
