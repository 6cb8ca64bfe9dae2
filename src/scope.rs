//! Per-statement execution context handed to query callbacks.

use std::time::Duration;

use sea_orm::{DbBackend, Statement, Value};
use tracing::Span;

use crate::parser::{self, SqlOperation};
use crate::sql_vars::SqlVarsTruncation;

/// The five lifecycle chains a callback can be registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Query,
    Update,
    Delete,
    /// Anything that is not plain CRUD: DDL, `SHOW`, `PRAGMA`, ...
    RowQuery,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Create,
        OperationKind::Query,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::RowQuery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::RowQuery => "row_query",
        }
    }

    /// Pick the chain a statement runs through from its verb.
    pub fn classify(sql: &str) -> Self {
        match SqlOperation::from_sql(sql) {
            SqlOperation::Insert => OperationKind::Create,
            SqlOperation::Select => OperationKind::Query,
            SqlOperation::Update => OperationKind::Update,
            SqlOperation::Delete => OperationKind::Delete,
            _ => OperationKind::RowQuery,
        }
    }

    /// Value of the `db.method` tag for a statement of this kind.
    pub fn method(&self, sql: &str) -> String {
        match self {
            OperationKind::Create => "INSERT".to_owned(),
            OperationKind::Query => "SELECT".to_owned(),
            OperationKind::Update => "UPDATE".to_owned(),
            OperationKind::Delete => "DELETE".to_owned(),
            OperationKind::RowQuery => parser::first_keyword(sql),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings a connection handle carries into every scope it creates.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeSettings {
    pub(crate) parent_span: Option<Span>,
    pub(crate) truncation: Option<SqlVarsTruncation>,
}

/// State of one statement as it moves through the before and after callbacks.
///
/// The connection fills in the statement and the handle settings before the
/// `before` chain runs, and the outcome (error, rows, elapsed time) before the
/// `after` chain runs.
#[derive(Debug)]
pub struct Scope {
    kind: OperationKind,
    sql: String,
    values: Vec<Value>,
    backend: DbBackend,
    parent_span: Option<Span>,
    span: Option<Span>,
    truncation: Option<SqlVarsTruncation>,
    error: Option<String>,
    rows_affected: u64,
    elapsed: Duration,
}

impl Scope {
    /// Build a scope for `stmt`, classified from its SQL text.
    pub fn new(stmt: &Statement) -> Self {
        Self::with_kind(OperationKind::classify(&stmt.sql), stmt)
    }

    pub fn with_kind(kind: OperationKind, stmt: &Statement) -> Self {
        Self {
            kind,
            sql: stmt.sql.clone(),
            values: stmt
                .values
                .as_ref()
                .map(|values| values.0.clone())
                .unwrap_or_default(),
            backend: stmt.db_backend,
            parent_span: None,
            span: None,
            truncation: None,
            error: None,
            rows_affected: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn apply_settings(mut self, settings: &ScopeSettings) -> Self {
        self.parent_span = settings.parent_span.clone();
        self.truncation = settings.truncation;
        self
    }

    pub(crate) fn set_outcome<T, E: std::fmt::Display>(
        &mut self,
        result: &Result<T, E>,
        rows_affected: u64,
        elapsed: Duration,
    ) {
        self.error = result.as_ref().err().map(ToString::to_string);
        self.rows_affected = rows_affected;
        self.elapsed = elapsed;
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn backend(&self) -> DbBackend {
        self.backend
    }

    /// Primary table of the statement, when it can be read from the SQL.
    pub fn table_name(&self) -> Option<String> {
        parser::extract_table(&self.sql)
    }

    pub fn parent_span(&self) -> Option<&Span> {
        self.parent_span.as_ref()
    }

    pub fn set_parent_span(&mut self, span: Span) {
        self.parent_span = Some(span);
    }

    /// Span the statement executes in, if a `before` callback opened one.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = Some(span);
    }

    pub fn take_span(&mut self) -> Option<Span> {
        self.span.take()
    }

    pub fn truncation(&self) -> Option<&SqlVarsTruncation> {
        self.truncation.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::DbErr;

    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            OperationKind::classify("INSERT INTO users (name) VALUES ($1) RETURNING id"),
            OperationKind::Create
        );
        assert_eq!(OperationKind::classify("SELECT 1"), OperationKind::Query);
        assert_eq!(OperationKind::classify("UPDATE users SET a = 1"), OperationKind::Update);
        assert_eq!(OperationKind::classify("DELETE FROM users"), OperationKind::Delete);
        assert_eq!(OperationKind::classify("CREATE TABLE t (id int)"), OperationKind::RowQuery);
    }

    #[test]
    fn test_method() {
        assert_eq!(OperationKind::Create.method("insert into t values (1)"), "INSERT");
        assert_eq!(OperationKind::Query.method("WITH x AS (SELECT 1) SELECT * FROM x"), "SELECT");
        assert_eq!(OperationKind::RowQuery.method("show server_version"), "SHOW");
        assert_eq!(OperationKind::RowQuery.to_string(), "row_query");
    }

    #[test]
    fn test_scope_from_statement() {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"UPDATE "users" SET "name" = $1 WHERE "id" = $2"#,
            [Value::from("bob"), Value::Int(Some(3))],
        );

        let settings = ScopeSettings {
            parent_span: None,
            truncation: Some(SqlVarsTruncation::new(10, 10)),
        };
        let mut scope = Scope::new(&stmt).apply_settings(&settings);

        assert_eq!(scope.kind(), OperationKind::Update);
        assert_eq!(scope.values().len(), 2);
        assert_eq!(scope.table_name().as_deref(), Some("users"));
        assert_eq!(scope.truncation(), Some(&SqlVarsTruncation::new(10, 10)));
        assert!(scope.parent_span().is_none());

        let result: Result<(), DbErr> = Err(DbErr::Custom("boom".to_owned()));
        scope.set_outcome(&result, 0, Duration::from_millis(2));
        assert!(scope.has_error());
        assert_eq!(scope.error(), Some("Custom Error: boom"));
    }

    #[test]
    fn test_scope_without_values() {
        let stmt = Statement::from_string(DbBackend::Sqlite, "PRAGMA foreign_keys = ON");
        let scope = Scope::new(&stmt);

        assert_eq!(scope.kind(), OperationKind::RowQuery);
        assert!(scope.values().is_empty());
        assert!(!scope.has_error());
    }
}
