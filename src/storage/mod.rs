//! # Query Executor Trait
//!
//! This is THE contract between the backup pipelines and a database.
//! Export and import only ever send Cypher text plus parameters through it.
//!
//! ## Implementations
//!
//! | Executor | Module | Description |
//! |----------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory graph with snapshot transactions |
//! | Bolt driver | (caller) | Wrap any driver session in this trait |
//!
//! Connection setup, authentication, pooling and network retries belong to
//! the implementation, never to the pipelines.

pub mod memory;

use async_trait::async_trait;

use crate::execution::QueryResult;
use crate::model::PropertyMap;
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::MemoryBackend;

// ============================================================================
// QueryExecutor Trait
// ============================================================================

/// A database that runs Cypher inside scoped transactions.
///
/// Implementations report an unreachable server as `Error::Connectivity`
/// and must not retry internally.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    /// The transaction type for this executor.
    type Tx: Transaction;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction, discarding its writes.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Statements
    // ========================================================================

    /// Run one statement inside `tx` and collect its records.
    async fn run(&self, tx: &mut Self::Tx, statement: &str, params: PropertyMap) -> Result<QueryResult>;

    /// Run one statement in its own transaction.
    ///
    /// Commits on success; on failure the transaction is rolled back and the
    /// statement's error is returned.
    async fn run_auto(&self, mode: TxMode, statement: &str, params: PropertyMap) -> Result<QueryResult> {
        let mut tx = self.begin_tx(mode).await?;
        let outcome = self.run(&mut tx, statement, params).await;
        finish_tx(self, tx, outcome).await
    }
}

/// Close `tx` according to `outcome`: commit on `Ok`, roll back on `Err`.
///
/// A failed commit turns `Ok` into that error. A failed rollback is only
/// logged; the original error wins.
pub async fn finish_tx<E, T>(db: &E, tx: E::Tx, outcome: Result<T>) -> Result<T>
where
    E: QueryExecutor + ?Sized,
{
    match outcome {
        Ok(value) => {
            db.commit_tx(tx).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = db.rollback_tx(tx).await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}
