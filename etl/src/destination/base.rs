use std::future::Future;

use crate::error::EtlResult;
use crate::types::Value;

/// What a [`Statement`] does to its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Checks whether a row with the key exists.
    Exists,
    /// Overwrites the non-key columns of the row with the key.
    Update,
    /// Inserts a new row.
    Insert,
    /// Inserts a row, or updates it on a key conflict.
    Merge,
}

/// A parameterized statement against one warehouse table.
///
/// Besides the SQL text, a statement keeps its structure (table, key column, column list) so
/// sessions that do not speak SQL can interpret it. Parameters are in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    kind: StatementKind,
    table: String,
    primary_key: String,
    columns: Vec<String>,
    params: Vec<Value>,
    sql: String,
}

impl Statement {
    pub(crate) fn new(
        kind: StatementKind,
        table: &str,
        primary_key: &str,
        columns: Vec<String>,
        params: Vec<Value>,
        sql: String,
    ) -> Self {
        Self {
            kind,
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            columns,
            params,
            sql,
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// The unquoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Columns written by the statement, excluding the key for updates.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the bound primary key value.
    pub fn key_value(&self) -> Option<&Value> {
        match self.kind {
            StatementKind::Exists => self.params.first(),
            StatementKind::Update => self.params.last(),
            StatementKind::Insert | StatementKind::Merge => self
                .columns
                .iter()
                .position(|column| *column == self.primary_key)
                .and_then(|index| self.params.get(index)),
        }
    }

    /// Returns the written column values paired with their names.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.params.iter())
    }
}

/// A warehouse session held for the duration of one batch.
///
/// Statements run inside explicit transactions opened with [`WarehouseSession::begin`]. A
/// session must be given back with [`WarehouseSession::release`] which rolls back any
/// transaction still open.
pub trait WarehouseSession: Send {
    /// Runs an existence check and reports whether it returned a row.
    fn exists(&mut self, statement: &Statement) -> impl Future<Output = EtlResult<bool>> + Send;

    /// Runs a write statement and returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> impl Future<Output = EtlResult<u64>> + Send;

    fn begin(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Ends the session, rolling back an open transaction.
    fn release(self) -> impl Future<Output = EtlResult<()>> + Send
    where
        Self: Sized;
}

/// Opens [`WarehouseSession`]s.
pub trait WarehouseConnector {
    type Session: WarehouseSession;

    fn connect(&self) -> impl Future<Output = EtlResult<Self::Session>> + Send;
}
