//! # sea-orm-query-tracing
//!
//! Traces SeaORM statements as child spans of the span a request carries.
//!
//! Every statement run through a [`TracedConnection`] passes through a chain of
//! before/after [`QueryCallback`]s picked by its [`OperationKind`] (create,
//! query, update, delete, row query). The tracing pair registered by default
//! opens a `sql` span under the handle's parent span before the statement
//! runs, then records the statement, the bound parameters, the affected rows
//! and the error status and closes the span.
//!
//! No parent span, no tracing: a handle only traces once one is attached.
//!
//! Statements inside a transaction are traced when it is opened with
//! [`TracedConnection::begin_traced`] or [`TracedConnection::transaction_traced`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::Database;
//! use sea_orm_query_tracing::TracedConnection;
//!
//! let db = TracedConnection::from(Database::connect("postgres://localhost/mydb").await?);
//!
//! #[tracing::instrument(skip(db))]
//! async fn list_users(db: &TracedConnection) -> Result<Vec<users::Model>, DbErr> {
//!     // Attach the request span; statements below become its children.
//!     let db = db.with_current_span();
//!     Users::find().all(&db).await
//! }
//! ```
//!
//! ## Parameter truncation
//!
//! ```rust,ignore
//! use sea_orm_query_tracing::SqlVarsTruncation;
//!
//! // Strings cut to 256 characters, byte blobs to 64 bytes before logging.
//! let db = db.with_sql_vars_truncation(SqlVarsTruncation::new(256, 64));
//! ```
//!
//! ## Span fields
//!
//! | Field | Description |
//! |-------|-------------|
//! | `db.type` | Always "sql" |
//! | `db.system` | "postgresql", "mysql" or "sqlite" |
//! | `db.statement` | SQL text (when enabled) |
//! | `db.table` | Target table name (when detectable) |
//! | `db.method` | INSERT, SELECT, UPDATE, DELETE, or the first keyword of a row query |
//! | `db.count` | Rows affected/returned |
//! | `db.err`, `error` | Whether the statement failed |
//! | `otel.status_code` | "OK" or "ERROR" |
//! | `error.message` | Error details (on failure) |
//!
//! Bound parameters are emitted as a `db.sql_vars` event (a JSON array) on the span.

mod callbacks;
mod config;
mod connection;
mod parser;
mod scope;
mod sql_vars;
mod transaction;

pub use callbacks::{register_tracing_callbacks, CallbackChain, QueryCallback, TracingCallbacks};
pub use config::TracingConfig;
pub use connection::{TracedConnection, TracingExt};
pub use parser::{ParsedSql, SqlOperation};
pub use scope::{OperationKind, Scope};
pub use sql_vars::{encode as encode_sql_vars, truncate as truncate_sql_vars, SqlVarsTruncation};
pub use transaction::TracedTransaction;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        OperationKind, QueryCallback, Scope, SqlVarsTruncation, TracedConnection,
        TracedTransaction, TracingConfig, TracingExt,
    };
}
