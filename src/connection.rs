//! Traced database connection wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use tracing::{field, Instrument, Span};

use crate::callbacks::{self, CallbackChain, QueryCallback};
use crate::config::TracingConfig;
use crate::scope::{OperationKind, Scope, ScopeSettings};
use crate::sql_vars::SqlVarsTruncation;
use crate::transaction::TracedTransaction;

/// A SeaORM `DatabaseConnection` that runs every statement through a
/// [`CallbackChain`], with the tracing callbacks registered on all chains.
///
/// The wrapper implements `ConnectionTrait`, `StreamTrait` and
/// `TransactionTrait`, so it is a drop-in replacement for
/// `DatabaseConnection`. Handles are cheap to clone and share one connection.
///
/// The `TransactionTrait` methods hand out a plain `DatabaseTransaction`:
/// only the transaction itself gets a span, not the statements run in it.
/// Use [`begin_traced`](Self::begin_traced) or
/// [`transaction_traced`](Self::transaction_traced) to trace those as well.
///
/// # Span Nesting
///
/// Statements are traced only once a parent span is attached with
/// [`with_parent_span`](Self::with_parent_span). Each statement then gets a
/// `sql` span that is a child of it, typically the HTTP request span.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use sea_orm_query_tracing::{SqlVarsTruncation, TracedConnection};
///
/// let db = TracedConnection::from(Database::connect("postgres://localhost/mydb").await?)
///     .with_sql_vars_truncation(SqlVarsTruncation::new(256, 64));
///
/// // In a request handler:
/// let db = db.with_current_span();
/// let users = Users::find().all(&db).await?;
/// ```
#[derive(Debug, Clone)]
pub struct TracedConnection {
    inner: Arc<DatabaseConnection>,
    config: Arc<TracingConfig>,
    callbacks: Arc<CallbackChain>,
    settings: ScopeSettings,
}

impl TracedConnection {
    /// Create a new traced connection with the given configuration.
    pub fn new(connection: DatabaseConnection, config: TracingConfig) -> Self {
        let config = Arc::new(config);
        let mut callbacks = CallbackChain::new();
        callbacks::register_tracing_callbacks(&mut callbacks, config.clone());

        Self {
            inner: Arc::new(connection),
            config,
            callbacks: Arc::new(callbacks),
            settings: ScopeSettings::default(),
        }
    }

    /// Create a new traced connection with default configuration.
    pub fn wrap(connection: DatabaseConnection) -> Self {
        Self::new(connection, TracingConfig::default())
    }

    /// A handle whose statements are traced as children of `span`.
    ///
    /// A disabled span (no subscriber interested in it, or `Span::none()`)
    /// leaves tracing off for the returned handle.
    pub fn with_parent_span(&self, span: &Span) -> Self {
        let mut traced = self.clone();
        if !span.is_disabled() {
            traced.settings.parent_span = Some(span.clone());
        }
        traced
    }

    /// [`with_parent_span`](Self::with_parent_span) with `Span::current()`.
    pub fn with_current_span(&self) -> Self {
        self.with_parent_span(&Span::current())
    }

    /// A handle that truncates bound parameters before logging them.
    pub fn with_sql_vars_truncation(&self, truncation: SqlVarsTruncation) -> Self {
        let mut traced = self.clone();
        traced.settings.truncation = Some(truncation);
        traced
    }

    /// Add a callback to one chain of this handle.
    ///
    /// Handles cloned earlier keep the chain they were cloned with.
    pub fn register_callback(
        &mut self,
        kind: OperationKind,
        name: impl Into<String>,
        callback: Arc<dyn QueryCallback>,
    ) {
        Arc::make_mut(&mut self.callbacks).register(kind, name, callback);
    }

    pub fn remove_callback(&mut self, kind: OperationKind, name: &str) -> bool {
        Arc::make_mut(&mut self.callbacks).remove(kind, name)
    }

    pub fn callbacks(&self) -> &CallbackChain {
        &self.callbacks
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    /// Unwrap the inner `DatabaseConnection`.
    ///
    /// `None` while other handles cloned from this one are still alive.
    pub fn into_inner(self) -> Option<DatabaseConnection> {
        Arc::into_inner(self.inner)
    }

    /// Begin a transaction whose statements run through this handle's callbacks.
    ///
    /// They are traced as children of a `db.transaction` span, itself a child
    /// of the handle's parent span.
    pub async fn begin_traced(&self) -> Result<TracedTransaction, DbErr> {
        self.begin_traced_with_config(None, None).await
    }

    pub async fn begin_traced_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<TracedTransaction, DbErr> {
        let span = self.transaction_span("TRANSACTION", isolation_level, access_mode);
        let result = self
            .inner
            .begin_with_config(isolation_level, access_mode)
            .instrument(span.clone())
            .await;

        match result {
            Ok(txn) => Ok(TracedTransaction::new(
                txn,
                self.callbacks.clone(),
                self.settings.clone(),
                span,
            )),
            Err(err) => {
                record_status(&span, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Run `callback` in a traced transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub async fn transaction_traced<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c TracedTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let txn = self
            .begin_traced()
            .await
            .map_err(TransactionError::Connection)?;
        txn.run(callback).await
    }

    pub async fn transaction_traced_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c TracedTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let txn = self
            .begin_traced_with_config(isolation_level, access_mode)
            .await
            .map_err(TransactionError::Connection)?;
        txn.run(callback).await
    }

    fn scope(&self, stmt: &Statement) -> Scope {
        Scope::new(stmt).apply_settings(&self.settings)
    }

    fn transaction_span(
        &self,
        name: &'static str,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Span {
        transaction_span(
            &self.settings,
            &self.config,
            self.inner.get_database_backend(),
            name,
            isolation_level,
            access_mode,
        )
    }
}

/// Run `fut` between the before and after chains of `scope`.
pub(crate) async fn traced<T, F>(
    callbacks: &CallbackChain,
    mut scope: Scope,
    fut: F,
    rows: impl FnOnce(&T) -> u64,
) -> Result<T, DbErr>
where
    F: Future<Output = Result<T, DbErr>>,
{
    callbacks.run_before(&mut scope);
    let start = Instant::now();

    let result = match scope.span() {
        Some(span) => fut.instrument(span.clone()).await,
        None => fut.await,
    };

    let rows_affected = result.as_ref().map(rows).unwrap_or(0);
    scope.set_outcome(&result, rows_affected, start.elapsed());
    callbacks.run_after(&mut scope);

    result
}

/// `db.transaction` span under the parent span, or a disabled span without one.
fn transaction_span(
    settings: &ScopeSettings,
    config: &TracingConfig,
    backend: DbBackend,
    name: &'static str,
    isolation_level: Option<IsolationLevel>,
    access_mode: Option<AccessMode>,
) -> Span {
    let Some(parent) = callbacks::resolve_parent(settings.parent_span.as_ref(), config) else {
        return Span::none();
    };

    tracing::info_span!(
        parent: &parent,
        "db.transaction",
        "otel.name" = name,
        "db.system" = callbacks::db_system(backend),
        "db.operation" = name,
        "db.transaction.isolation_level" = ?isolation_level,
        "db.transaction.access_mode" = ?access_mode,
        "db.transaction.outcome" = field::Empty,
        "otel.status_code" = field::Empty,
        "error.message" = field::Empty,
    )
}

pub(crate) fn record_status(span: &Span, error: Option<String>) {
    match error {
        None => {
            span.record("otel.status_code", "OK");
        }
        Some(message) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", message.as_str());
        }
    }
}

impl From<DatabaseConnection> for TracedConnection {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}

impl AsRef<DatabaseConnection> for TracedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for TracedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let scope = self.scope(&stmt);
        traced(
            &self.callbacks,
            scope,
            self.inner.execute(stmt),
            ExecResult::rows_affected,
        )
        .await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let stmt = Statement::from_string(self.get_database_backend(), sql);
        let scope = self.scope(&stmt);
        traced(
            &self.callbacks,
            scope,
            self.inner.execute_unprepared(sql),
            ExecResult::rows_affected,
        )
        .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let scope = self.scope(&stmt);
        let rows = |row: &Option<QueryResult>| row.is_some() as u64;
        traced(&self.callbacks, scope, self.inner.query_one(stmt), rows).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let scope = self.scope(&stmt);
        let rows = |rows: &Vec<QueryResult>| rows.len() as u64;
        traced(&self.callbacks, scope, self.inner.query_all(stmt), rows).await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl StreamTrait for TracedConnection {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        let scope = self.scope(&stmt);

        // Rows are only known once the stream is drained, so none are recorded.
        Box::pin(async move {
            traced(&self.callbacks, scope, (*self.inner).stream(stmt), |_| 0).await
        })
    }
}

/// Statements run on the `DatabaseTransaction` these methods hand out bypass
/// the callback chain.
#[async_trait]
impl TransactionTrait for TracedConnection {
    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        let span = self.transaction_span("BEGIN", None, None);
        let result = self.inner.begin().instrument(span.clone()).await;
        record_status(&span, result.as_ref().err().map(ToString::to_string));
        result
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<DatabaseTransaction, DbErr> {
        let span = self.transaction_span("BEGIN", isolation_level, access_mode);
        let result = self
            .inner
            .begin_with_config(isolation_level, access_mode)
            .instrument(span.clone())
            .await;
        record_status(&span, result.as_ref().err().map(ToString::to_string));
        result
    }

    async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = self.transaction_span("TRANSACTION", None, None);
        let result = self
            .inner
            .transaction(callback)
            .instrument(span.clone())
            .await;
        span.record("db.transaction.outcome", transaction_outcome(&result));
        record_status(&span, result.as_ref().err().map(|e| format!("{e:?}")));
        result
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let span = self.transaction_span("TRANSACTION", isolation_level, access_mode);
        let result = self
            .inner
            .transaction_with_config(callback, isolation_level, access_mode)
            .instrument(span.clone())
            .await;
        span.record("db.transaction.outcome", transaction_outcome(&result));
        record_status(&span, result.as_ref().err().map(|e| format!("{e:?}")));
        result
    }
}

fn transaction_outcome<T, E>(result: &Result<T, TransactionError<E>>) -> &'static str {
    match result {
        Ok(_) => "commit",
        Err(TransactionError::Transaction(_)) => "rollback",
        Err(TransactionError::Connection(_)) => "error",
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait TracingExt {
    /// Wrap this connection with tracing instrumentation.
    fn with_tracing(self) -> TracedConnection;

    /// Wrap this connection with custom tracing configuration.
    fn with_tracing_config(self, config: TracingConfig) -> TracedConnection;
}

impl TracingExt for DatabaseConnection {
    fn with_tracing(self) -> TracedConnection {
        TracedConnection::wrap(self)
    }

    fn with_tracing_config(self, config: TracingConfig) -> TracedConnection {
        TracedConnection::new(self, config)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::MockDatabase;

    use super::*;

    fn mock() -> DatabaseConnection {
        MockDatabase::new(DbBackend::Postgres).into_connection()
    }

    struct Noop;

    impl QueryCallback for Noop {}

    #[test]
    fn test_disabled_parent_leaves_tracing_off() {
        let traced = mock().with_tracing();

        assert!(traced.with_parent_span(&Span::none()).settings.parent_span.is_none());
        // No subscriber is installed, so the current span is disabled too.
        assert!(traced.with_current_span().settings.parent_span.is_none());
    }

    #[test]
    fn test_truncation_is_per_handle() {
        let traced = mock().with_tracing();
        let truncated = traced.with_sql_vars_truncation(SqlVarsTruncation::new(8, 4));

        assert_eq!(truncated.settings.truncation, Some(SqlVarsTruncation::new(8, 4)));
        assert!(traced.settings.truncation.is_none());
    }

    #[test]
    fn test_register_callback_does_not_leak_into_clones() {
        let mut traced = mock().with_tracing_config(TracingConfig::production());
        let before = traced.clone();

        traced.register_callback(OperationKind::Update, "audit", Arc::new(Noop));

        assert_eq!(
            traced.callbacks().names(OperationKind::Update),
            vec!["tracing:update", "audit"]
        );
        assert_eq!(
            before.callbacks().names(OperationKind::Update),
            vec!["tracing:update"]
        );
        assert!(traced.remove_callback(OperationKind::Update, "audit"));
        assert!(!traced.config().log_statements);
    }

    #[test]
    fn test_clones_share_one_connection() {
        let traced = mock().with_tracing();
        let child = traced.with_parent_span(&Span::none());

        assert!(Arc::ptr_eq(&traced.inner, &child.inner));
        assert!(Arc::ptr_eq(&traced.inner, &traced.clone().inner));

        // The connection is only handed back by its last handle.
        assert!(traced.into_inner().is_none());
        assert!(child.into_inner().is_some());
    }

    #[test]
    fn test_backend_passthrough() {
        let traced = TracedConnection::from(mock());
        assert_eq!(traced.get_database_backend(), DbBackend::Postgres);
        assert!(traced.is_mock_connection());
    }
}
