//! Shared helpers for the end-to-end suites.
//!
//! `TestExecutor` wraps a `MemoryBackend`, records every statement it runs
//! and can be told to fail a chosen statement once.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use neo4j_backup::execution::QueryResult;
use neo4j_backup::storage::memory::MemoryTx;
use neo4j_backup::{Error, MemoryBackend, PropertyMap, QueryExecutor, Result, TxMode, Value};

// ============================================================================
// TestExecutor
// ============================================================================

struct FailureRule {
    pattern: String,
    /// Matching statements still to let through before failing.
    skip: AtomicUsize,
    fired: AtomicUsize,
}

pub struct TestExecutor {
    pub inner: MemoryBackend,
    statements: Mutex<Vec<String>>,
    rule: Mutex<Option<FailureRule>>,
}

impl TestExecutor {
    pub fn new(inner: MemoryBackend) -> Self {
        Self { inner, statements: Mutex::new(Vec::new()), rule: Mutex::new(None) }
    }

    /// Fail the `(skip + 1)`-th statement containing `pattern`, once.
    pub fn fail_once(&self, pattern: &str, skip: usize) {
        *self.rule.lock() = Some(FailureRule {
            pattern: pattern.to_owned(),
            skip: AtomicUsize::new(skip),
            fired: AtomicUsize::new(0),
        });
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn clear(&self) {
        self.statements.lock().clear();
    }

    fn should_fail(&self, statement: &str) -> bool {
        let rule = self.rule.lock();
        let Some(rule) = rule.as_ref() else { return false };
        if !statement.contains(&rule.pattern) || rule.fired.load(Ordering::SeqCst) > 0 {
            return false;
        }
        if rule.skip.load(Ordering::SeqCst) > 0 {
            rule.skip.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        rule.fired.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl QueryExecutor for TestExecutor {
    type Tx = MemoryTx;

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        self.inner.begin_tx(mode).await
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        self.inner.commit_tx(tx).await
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        self.inner.rollback_tx(tx).await
    }

    async fn run(&self, tx: &mut MemoryTx, statement: &str, params: PropertyMap) -> Result<QueryResult> {
        self.statements.lock().push(statement.to_owned());
        if self.should_fail(statement) {
            return Err(Error::Query(format!("injected failure: {statement}")));
        }
        self.inner.run(tx, statement, params).await
    }
}

// ============================================================================
// Seeding and comparison
// ============================================================================

pub fn props(pairs: &[(&str, Value)]) -> PropertyMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// `count` `Person` nodes with a `seq` and a `name`, chained by `NEXT`.
pub fn people(count: i64) -> MemoryBackend {
    let db = MemoryBackend::new();
    let mut prev = None;
    for seq in 0..count {
        let id = db
            .insert_node(["Person"], props(&[("seq", Value::Int(seq)), ("name", Value::from(format!("p{seq}")))]))
            .unwrap();
        if let Some(prev) = prev {
            db.insert_relationship(prev, id, "NEXT", PropertyMap::new()).unwrap();
        }
        prev = Some(id);
    }
    db
}

/// Graph content independent of internal ids: each node as
/// `(labels, properties)`, each relationship as
/// `(start properties, type, end properties, properties)`, all sorted.
pub fn fingerprint(db: &MemoryBackend) -> (Vec<String>, Vec<String>) {
    let graph = db.snapshot();
    let describe = |labels: &dyn std::fmt::Debug, props: &PropertyMap| {
        let rendered: BTreeMap<&String, String> = props.iter().map(|(k, v)| (k, v.to_string())).collect();
        format!("{labels:?} {rendered:?}")
    };
    let mut nodes: Vec<String> = graph.nodes().map(|n| describe(&n.labels, &n.properties)).collect();
    let mut rels: Vec<String> = graph
        .relationships()
        .map(|r| {
            let start = graph.node(r.src).map(|n| describe(&n.labels, &n.properties)).unwrap_or_default();
            let end = graph.node(r.dst).map(|n| describe(&n.labels, &n.properties)).unwrap_or_default();
            format!("({start})-[{} {}]->({end})", r.rel_type, describe(&"", &r.properties))
        })
        .collect();
    nodes.sort();
    rels.sort();
    (nodes, rels)
}
