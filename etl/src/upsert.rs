//! The upsert engine: writes one extracted row to its destination table by primary key.
//!
//! In [`UpsertMode::CheckThenAct`] the engine reads before it writes: an existence check by key
//! decides between an `UPDATE` of the non-key columns and an `INSERT` of every column. The two
//! steps are not atomic, so concurrent batches upserting the same key can lose an update. With
//! [`UpsertMode::OnConflict`] a single `INSERT .. ON CONFLICT .. DO UPDATE` statement does both,
//! which requires a uniqueness constraint on the key column.
//!
//! Values are always bound as parameters. Table and column names come from configuration and
//! are folded to lower case before they are quoted into the SQL text, so they name the same
//! objects as the unquoted identifiers a warehouse folds itself: `Analytics.Users` writes to
//! `analytics.users`.

use etl_config::shared::UpsertMode;
use pg_escape::quote_identifier;
use std::fmt;
use tracing::{debug, info};

use crate::bail;
use crate::destination::{Statement, StatementKind, WarehouseSession};
use crate::error::{ErrorKind, EtlResult};
use crate::types::{UpsertRow, Value};

/// What an upsert did to the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The row exists and there was nothing besides the key to write.
    Unchanged,
    /// Written by a single conflict-handling statement.
    Merged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::Merged => "merged",
        };
        f.write_str(outcome)
    }
}

/// Case-folds and quotes a single identifier.
fn quote(identifier: &str) -> String {
    quote_identifier(&identifier.to_lowercase()).into_owned()
}

/// Quotes a possibly schema-qualified table name segment by segment.
fn quote_table(table: &str) -> String {
    table.split('.').map(quote).collect::<Vec<_>>().join(".")
}

fn quote_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    columns.into_iter().map(quote).collect()
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|index| format!("${index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT 1 FROM table WHERE pk = $1 LIMIT 1`
pub fn exists_statement(table: &str, primary_key: &str, key: &Value) -> Statement {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = $1 LIMIT 1",
        quote_table(table),
        quote(primary_key)
    );

    Statement::new(
        StatementKind::Exists,
        table,
        primary_key,
        Vec::new(),
        vec![key.clone()],
        sql,
    )
}

/// `UPDATE table SET c1 = $1, .. WHERE pk = $n` over every column except the key.
///
/// Returns `None` when the row has no column besides the key.
pub fn update_statement(table: &str, primary_key: &str, row: &UpsertRow) -> Option<Statement> {
    let (columns, mut params): (Vec<String>, Vec<Value>) = row
        .iter()
        .filter(|(column, _)| *column != primary_key)
        .map(|(column, value)| (column.to_string(), value.clone()))
        .unzip();

    if columns.is_empty() {
        return None;
    }

    let key = row.get(primary_key)?;
    let assignments = quote_columns(columns.iter().map(String::as_str))
        .into_iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ${}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        quote_table(table),
        assignments,
        quote(primary_key),
        columns.len() + 1
    );
    params.push(key.clone());

    Some(Statement::new(
        StatementKind::Update,
        table,
        primary_key,
        columns,
        params,
        sql,
    ))
}

/// `INSERT INTO table (c1, ..) VALUES ($1, ..)` over every column of the row.
pub fn insert_statement(table: &str, primary_key: &str, row: &UpsertRow) -> Statement {
    let (columns, params) = split_row(row);
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table(table),
        quote_columns(columns.iter().map(String::as_str)).join(", "),
        placeholders(columns.len())
    );

    Statement::new(
        StatementKind::Insert,
        table,
        primary_key,
        columns,
        params,
        sql,
    )
}

/// `INSERT .. ON CONFLICT (pk) DO UPDATE SET c = EXCLUDED.c, ..`, or `DO NOTHING` for a
/// key-only row.
pub fn merge_statement(table: &str, primary_key: &str, row: &UpsertRow) -> Statement {
    let (columns, params) = split_row(row);
    let quoted = quote_columns(columns.iter().map(String::as_str));
    let quoted_key = quote(primary_key);

    let assignments = quoted
        .iter()
        .filter(|column| **column != quoted_key)
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect::<Vec<_>>();
    let action = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_table(table),
        quoted.join(", "),
        placeholders(columns.len()),
        quoted_key,
        action
    );

    Statement::new(
        StatementKind::Merge,
        table,
        primary_key,
        columns,
        params,
        sql,
    )
}

fn split_row(row: &UpsertRow) -> (Vec<String>, Vec<Value>) {
    row.iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .unzip()
}

/// Upserts rows through a [`WarehouseSession`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertEngine {
    mode: UpsertMode,
}

impl UpsertEngine {
    pub fn new(mode: UpsertMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> UpsertMode {
        self.mode
    }

    /// Makes `row` the state of the row keyed by `row[primary_key]` in `table`.
    ///
    /// Fails with [`ErrorKind::MissingPrimaryKeyValue`] before touching the warehouse when the
    /// row has no key value. Warehouse failures are returned as they are.
    pub async fn upsert<S>(
        &self,
        session: &mut S,
        table: &str,
        primary_key: &str,
        row: &UpsertRow,
    ) -> EtlResult<UpsertOutcome>
    where
        S: WarehouseSession,
    {
        let Some(key) = row.get(primary_key) else {
            bail!(
                ErrorKind::MissingPrimaryKeyValue,
                "Row has no value for the primary key column",
                format!("table {table}, column {primary_key}")
            );
        };

        match self.mode {
            UpsertMode::CheckThenAct => {
                self.check_then_act(session, table, primary_key, key, row)
                    .await
            }
            UpsertMode::OnConflict => {
                let statement = merge_statement(table, primary_key, row);
                info!(table, primary_key = %key, "merging row");
                let affected = session.execute(&statement).await?;
                info!(table, primary_key = %key, affected, "merged row");

                Ok(UpsertOutcome::Merged)
            }
        }
    }

    async fn check_then_act<S>(
        &self,
        session: &mut S,
        table: &str,
        primary_key: &str,
        key: &Value,
        row: &UpsertRow,
    ) -> EtlResult<UpsertOutcome>
    where
        S: WarehouseSession,
    {
        let exists = session
            .exists(&exists_statement(table, primary_key, key))
            .await?;
        debug!(table, primary_key = %key, exists, "checked for existing row");

        if exists {
            let Some(statement) = update_statement(table, primary_key, row) else {
                info!(table, primary_key = %key, "row exists with nothing to update");
                return Ok(UpsertOutcome::Unchanged);
            };

            info!(table, primary_key = %key, "updating row");
            let affected = session.execute(&statement).await?;
            info!(table, primary_key = %key, affected, "updated row");

            Ok(UpsertOutcome::Updated)
        } else {
            let statement = insert_statement(table, primary_key, row);

            info!(table, primary_key = %key, "inserting row");
            let affected = session.execute(&statement).await?;
            info!(table, primary_key = %key, affected, "inserted row");

            Ok(UpsertOutcome::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::memory::MemoryWarehouse;
    use insta::assert_snapshot;

    fn row(columns: &[(&str, Value)]) -> UpsertRow {
        columns
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    fn user_row() -> UpsertRow {
        row(&[
            ("id", Value::from("u1")),
            ("email", Value::from("ann@example.com")),
            ("age", Value::from(30)),
        ])
    }

    #[test]
    fn builds_parameterized_statements() {
        let row = user_row();

        let exists = exists_statement("users_dw", "id", &Value::from("u1"));
        assert_snapshot!(exists.sql(), @"SELECT 1 FROM users_dw WHERE id = $1 LIMIT 1");
        assert_eq!(exists.params(), &[Value::from("u1")]);

        let update = update_statement("users_dw", "id", &row).unwrap();
        assert_snapshot!(update.sql(), @"UPDATE users_dw SET email = $1, age = $2 WHERE id = $3");
        assert_eq!(
            update.params(),
            &[
                Value::from("ann@example.com"),
                Value::from(30),
                Value::from("u1")
            ]
        );

        let insert = insert_statement("users_dw", "id", &row);
        assert_snapshot!(insert.sql(), @"INSERT INTO users_dw (id, email, age) VALUES ($1, $2, $3)");
        assert_eq!(insert.key_value(), Some(&Value::from("u1")));

        let merge = merge_statement("users_dw", "id", &row);
        assert_snapshot!(
            merge.sql(),
            @"INSERT INTO users_dw (id, email, age) VALUES ($1, $2, $3) ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, age = EXCLUDED.age"
        );
    }

    #[test]
    fn quotes_identifiers_but_never_values() {
        let row = row(&[
            ("id", Value::from("u1'; DROP TABLE users; --")),
            ("Display Name", Value::from("Ann")),
        ]);

        let insert = insert_statement("analytics.Users", "id", &row);
        assert_snapshot!(
            insert.sql(),
            @r#"INSERT INTO analytics.users (id, "display name") VALUES ($1, $2)"#
        );
        assert!(!insert.sql().contains("DROP"));
    }

    #[test]
    fn folds_identifier_case() {
        let exists = exists_statement("Analytics.Users", "UserId", &Value::from("u1"));
        assert_snapshot!(
            exists.sql(),
            @"SELECT 1 FROM analytics.users WHERE userid = $1 LIMIT 1"
        );
        assert_eq!(exists.table(), "Analytics.Users");
        assert_eq!(exists.primary_key(), "UserId");
    }

    #[test]
    fn key_only_rows_have_no_update() {
        let row = row(&[("id", Value::from("u1"))]);

        assert!(update_statement("users_dw", "id", &row).is_none());
        assert_snapshot!(
            merge_statement("users_dw", "id", &row).sql(),
            @"INSERT INTO users_dw (id) VALUES ($1) ON CONFLICT (id) DO NOTHING"
        );
    }

    #[tokio::test]
    async fn inserts_missing_rows() {
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.session();

        let outcome = UpsertEngine::default()
            .upsert(&mut session, "users_dw", "id", &user_row())
            .await
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(
            warehouse.statement_kinds(),
            vec![StatementKind::Exists, StatementKind::Insert]
        );
        assert_eq!(
            warehouse.row("users_dw", &Value::from("u1")),
            Some(user_row())
        );
    }

    #[tokio::test]
    async fn updates_existing_rows_without_rewriting_the_key() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_row(
            "users_dw",
            "id",
            row(&[("id", Value::from("u1")), ("email", Value::from("old@example.com"))]),
        );
        let mut session = warehouse.session();

        let outcome = UpsertEngine::default()
            .upsert(&mut session, "users_dw", "id", &user_row())
            .await
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Updated);
        let statements = warehouse.statements();
        assert_eq!(
            statements.iter().map(Statement::kind).collect::<Vec<_>>(),
            vec![StatementKind::Exists, StatementKind::Update]
        );
        assert_eq!(statements[1].columns(), &["email".to_string(), "age".to_string()]);
        assert_eq!(
            warehouse.row("users_dw", &Value::from("u1")),
            Some(user_row())
        );
    }

    #[tokio::test]
    async fn upserting_twice_is_idempotent() {
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.session();
        let engine = UpsertEngine::default();

        engine
            .upsert(&mut session, "users_dw", "id", &user_row())
            .await
            .unwrap();
        let after_first = warehouse.rows("users_dw");
        engine
            .upsert(&mut session, "users_dw", "id", &user_row())
            .await
            .unwrap();

        assert_eq!(warehouse.rows("users_dw"), after_first);
        assert_eq!(after_first.len(), 1);
    }

    #[tokio::test]
    async fn existing_key_only_row_is_left_unchanged() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_row("users_dw", "id", row(&[("id", Value::from("u1"))]));
        let mut session = warehouse.session();

        let outcome = UpsertEngine::default()
            .upsert(&mut session, "users_dw", "id", &row(&[("id", Value::from("u1"))]))
            .await
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(warehouse.statement_kinds(), vec![StatementKind::Exists]);
    }

    #[tokio::test]
    async fn missing_key_fails_without_warehouse_calls() {
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.session();

        let err = UpsertEngine::default()
            .upsert(&mut session, "users_dw", "id", &row(&[("email", Value::from("a"))]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingPrimaryKeyValue);
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test]
    async fn on_conflict_mode_issues_one_statement() {
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.session();
        let engine = UpsertEngine::new(UpsertMode::OnConflict);

        for _ in 0..2 {
            let outcome = engine
                .upsert(&mut session, "users_dw", "id", &user_row())
                .await
                .unwrap();
            assert_eq!(outcome, UpsertOutcome::Merged);
        }

        assert_eq!(
            warehouse.statement_kinds(),
            vec![StatementKind::Merge, StatementKind::Merge]
        );
        assert_eq!(warehouse.rows("users_dw"), vec![user_row()]);
    }

    #[tokio::test]
    async fn warehouse_failures_propagate() {
        let warehouse = MemoryWarehouse::new();
        warehouse.fail_on(StatementKind::Insert, ErrorKind::DestinationConstraintViolation);
        let mut session = warehouse.session();

        let err = UpsertEngine::default()
            .upsert(&mut session, "users_dw", "id", &user_row())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationConstraintViolation);
        assert!(warehouse.rows("users_dw").is_empty());
    }
}
