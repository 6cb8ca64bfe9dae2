//! Transactions whose statements run through the callback chain.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, DbErr, ExecResult, QueryResult, Statement,
    StreamTrait, TransactionError,
};
use tracing::{Instrument, Span};

use crate::callbacks::CallbackChain;
use crate::connection::{record_status, traced};
use crate::scope::{Scope, ScopeSettings};

/// A `DatabaseTransaction` opened by
/// [`TracedConnection::begin_traced`](crate::TracedConnection::begin_traced).
///
/// Statements get the same callbacks as on the connection, with the
/// `db.transaction` span as their parent. The span closes once the
/// transaction is committed, rolled back or dropped. Dropping without
/// committing rolls back, as with a plain `DatabaseTransaction`.
pub struct TracedTransaction {
    inner: DatabaseTransaction,
    callbacks: Arc<CallbackChain>,
    settings: ScopeSettings,
    span: Span,
}

impl TracedTransaction {
    pub(crate) fn new(
        inner: DatabaseTransaction,
        callbacks: Arc<CallbackChain>,
        mut settings: ScopeSettings,
        span: Span,
    ) -> Self {
        if !span.is_disabled() {
            settings.parent_span = Some(span.clone());
        }
        Self {
            inner,
            callbacks,
            settings,
            span,
        }
    }

    pub fn inner(&self) -> &DatabaseTransaction {
        &self.inner
    }

    /// The `db.transaction` span, disabled when the connection had no parent span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub async fn commit(self) -> Result<(), DbErr> {
        let span = self.span;
        let result = self.inner.commit().instrument(span.clone()).await;
        span.record("db.transaction.outcome", "commit");
        record_status(&span, result.as_ref().err().map(ToString::to_string));
        result
    }

    pub async fn rollback(self) -> Result<(), DbErr> {
        let span = self.span;
        let result = self.inner.rollback().instrument(span.clone()).await;
        span.record("db.transaction.outcome", "rollback");
        record_status(&span, result.as_ref().err().map(ToString::to_string));
        result
    }

    pub(crate) async fn run<F, T, E>(self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c TracedTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: fmt::Display + fmt::Debug + Send,
    {
        let span = self.span.clone();
        let outcome = callback(&self).instrument(span).await;

        match outcome {
            Ok(value) => {
                self.commit().await.map_err(TransactionError::Connection)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback().await.map_err(TransactionError::Connection)?;
                Err(TransactionError::Transaction(err))
            }
        }
    }

    fn scope(&self, stmt: &Statement) -> Scope {
        Scope::new(stmt).apply_settings(&self.settings)
    }
}

impl fmt::Debug for TracedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedTransaction")
            .field("callbacks", &self.callbacks)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionTrait for TracedTransaction {
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

impl StreamTrait for TracedTransaction {
    type Stream<'a> = <DatabaseTransaction as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        let scope = self.scope(&stmt);
        Box::pin(async move {
            traced(&self.callbacks, scope, self.inner.stream(stmt), |_| 0).await
        })
    }
}
