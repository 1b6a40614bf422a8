//! An in-memory warehouse that interprets [`Statement`]s against tables held in memory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::destination::{Statement, StatementKind, WarehouseConnector, WarehouseSession};
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::{UpsertRow, Value};

type Tables = BTreeMap<String, Vec<UpsertRow>>;

#[derive(Debug, Clone)]
struct Failure {
    kind: StatementKind,
    key: Option<Value>,
    error: ErrorKind,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    statements: Vec<Statement>,
    failures: Vec<Failure>,
    commits: usize,
    rollbacks: usize,
    releases: usize,
    delay: Option<Duration>,
}

/// Shared in-memory tables plus a log of every statement run against them.
///
/// Clones share state, so a test can keep one handle for assertions while sessions write
/// through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session directly, without a connector.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            warehouse: self.clone(),
            snapshot: None,
        }
    }

    /// Seeds a row, replacing any row with the same key.
    pub fn insert_row(&self, table: &str, primary_key: &str, row: UpsertRow) {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table.to_string()).or_default();
        match row.get(primary_key) {
            Some(key) => {
                let key = key.clone();
                rows.retain(|existing| existing.get(primary_key) != Some(&key));
                rows.push(row);
            }
            None => rows.push(row),
        }
    }

    /// Fails every statement of `kind` with `error`.
    pub fn fail_on(&self, kind: StatementKind, error: ErrorKind) {
        self.inner.lock().unwrap().failures.push(Failure {
            kind,
            key: None,
            error,
        });
    }

    /// Fails statements of `kind` whose bound key equals `key`.
    pub fn fail_on_key(&self, kind: StatementKind, key: Value, error: ErrorKind) {
        self.inner.lock().unwrap().failures.push(Failure {
            kind,
            key: Some(key),
            error,
        });
    }

    /// Delays every statement by `delay` before it runs.
    pub fn delay_statements(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }

    fn delay(&self) -> Option<Duration> {
        self.inner.lock().unwrap().delay
    }

    /// Rows of `table` in insertion order.
    pub fn rows(&self, table: &str) -> Vec<UpsertRow> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// The first row of `table` holding `key` in any column.
    pub fn row(&self, table: &str, key: &Value) -> Option<UpsertRow> {
        self.rows(table)
            .into_iter()
            .find(|row| row.iter().any(|(_, value)| value == key))
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.inner.lock().unwrap().statements.clone()
    }

    pub fn statement_kinds(&self) -> Vec<StatementKind> {
        self.statements().iter().map(Statement::kind).collect()
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().unwrap().rollbacks
    }

    pub fn releases(&self) -> usize {
        self.inner.lock().unwrap().releases
    }

    fn run(&self, statement: &Statement) -> EtlResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.statements.push(statement.clone());

        let key = statement.key_value().cloned().unwrap_or(Value::Null);
        if let Some(failure) = inner.failures.iter().find(|failure| {
            failure.kind == statement.kind()
                && failure.key.as_ref().is_none_or(|failing| *failing == key)
        }) {
            return Err(etl_error!(
                failure.error,
                "Injected warehouse failure",
                statement.sql()
            ));
        }

        let primary_key = statement.primary_key();
        let rows = inner
            .tables
            .entry(statement.table().to_string())
            .or_default();
        let position = rows
            .iter()
            .position(|row| row.get(primary_key) == Some(&key));

        debug!(sql = statement.sql(), "running statement in memory");

        match (statement.kind(), position) {
            (StatementKind::Exists, Some(_)) => Ok(1),
            (StatementKind::Exists, None) => Ok(0),
            (StatementKind::Update, Some(index)) => {
                for (column, value) in statement.assignments() {
                    rows[index].insert(column, value.clone());
                }
                Ok(1)
            }
            (StatementKind::Update, None) => Ok(0),
            (StatementKind::Insert, Some(_)) => Err(etl_error!(
                ErrorKind::DestinationConstraintViolation,
                "Duplicate key",
                key
            )),
            (StatementKind::Insert | StatementKind::Merge, None) => {
                rows.push(
                    statement
                        .assignments()
                        .map(|(column, value)| (column.to_string(), value.clone()))
                        .collect(),
                );
                Ok(1)
            }
            (StatementKind::Merge, Some(index)) => {
                for (column, value) in statement.assignments() {
                    rows[index].insert(column, value.clone());
                }
                Ok(1)
            }
        }
    }
}

/// A session on a [`MemoryWarehouse`].
///
/// Beginning a transaction snapshots every table; rolling back restores the snapshot.
#[derive(Debug)]
pub struct MemorySession {
    warehouse: MemoryWarehouse,
    snapshot: Option<Tables>,
}

impl WarehouseSession for MemorySession {
    async fn exists(&mut self, statement: &Statement) -> EtlResult<bool> {
        if let Some(delay) = self.warehouse.delay() {
            tokio::time::sleep(delay).await;
        }

        Ok(self.warehouse.run(statement)? > 0)
    }

    async fn execute(&mut self, statement: &Statement) -> EtlResult<u64> {
        if let Some(delay) = self.warehouse.delay() {
            tokio::time::sleep(delay).await;
        }

        self.warehouse.run(statement)
    }

    async fn begin(&mut self) -> EtlResult<()> {
        if self.snapshot.is_some() {
            return Err(etl_error!(
                ErrorKind::InvalidState,
                "A warehouse transaction is already open"
            ));
        }

        self.snapshot = Some(self.warehouse.inner.lock().unwrap().tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> EtlResult<()> {
        self.snapshot = None;
        self.warehouse.inner.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        let mut inner = self.warehouse.inner.lock().unwrap();
        if let Some(snapshot) = self.snapshot.take() {
            inner.tables = snapshot;
        }
        inner.rollbacks += 1;
        Ok(())
    }

    async fn release(mut self) -> EtlResult<()> {
        if self.snapshot.is_some() {
            self.rollback().await?;
        }
        self.warehouse.inner.lock().unwrap().releases += 1;
        Ok(())
    }
}

/// Connects [`MemorySession`]s to a shared [`MemoryWarehouse`], counting connections.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    warehouse: MemoryWarehouse,
    connects: Arc<AtomicUsize>,
    refuse: Arc<Mutex<Option<ErrorKind>>>,
    connect_delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryConnector {
    pub fn new(warehouse: MemoryWarehouse) -> Self {
        Self {
            warehouse,
            ..Self::default()
        }
    }

    pub fn warehouse(&self) -> &MemoryWarehouse {
        &self.warehouse
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes every following connection attempt fail with `error`.
    pub fn refuse_connections(&self, error: ErrorKind) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    /// Delays every following connection attempt by `delay`.
    pub fn delay_connections(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }
}

impl WarehouseConnector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(&self) -> EtlResult<MemorySession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = *self.refuse.lock().unwrap() {
            return Err(etl_error!(error, "Connection refused by memory warehouse"));
        }

        Ok(self.warehouse.session())
    }
}
