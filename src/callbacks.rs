//! Before/after query callbacks and the tracing pair registered by default.

use std::fmt;
use std::sync::Arc;

use sea_orm::DbBackend;
use tracing::{field, Span};

use crate::config::TracingConfig;
use crate::parser::ParsedSql;
use crate::scope::{OperationKind, Scope};
use crate::sql_vars;

/// A hook invoked around every statement of the chains it is registered on.
///
/// `before` runs ahead of execution, `after` once the result is known. Both
/// see the same [`Scope`], so state opened in one can be closed in the other.
pub trait QueryCallback: Send + Sync {
    fn before(&self, _scope: &mut Scope) {}

    fn after(&self, _scope: &mut Scope) {}
}

#[derive(Clone)]
struct Registration {
    kind: OperationKind,
    name: String,
    callback: Arc<dyn QueryCallback>,
}

/// Named callbacks per [`OperationKind`], run in registration order.
#[derive(Clone, Default)]
pub struct CallbackChain {
    registrations: Vec<Registration>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` on the `kind` chain.
    ///
    /// A name already present on that chain is replaced in place.
    pub fn register(
        &mut self,
        kind: OperationKind,
        name: impl Into<String>,
        callback: Arc<dyn QueryCallback>,
    ) {
        let name = name.into();
        match self
            .registrations
            .iter_mut()
            .find(|r| r.kind == kind && r.name == name)
        {
            Some(existing) => {
                tracing::debug!(kind = %kind, name = %name, "replacing query callback");
                existing.callback = callback;
            }
            None => self.registrations.push(Registration {
                kind,
                name,
                callback,
            }),
        }
    }

    /// Remove a callback, returning whether it was registered.
    pub fn remove(&mut self, kind: OperationKind, name: &str) -> bool {
        let before = self.registrations.len();
        self.registrations
            .retain(|r| !(r.kind == kind && r.name == name));
        self.registrations.len() != before
    }

    /// Names registered on the `kind` chain, in order.
    pub fn names(&self, kind: OperationKind) -> Vec<&str> {
        self.chain(kind).map(|r| r.name.as_str()).collect()
    }

    pub fn run_before(&self, scope: &mut Scope) {
        for registration in self.chain(scope.kind()) {
            registration.callback.before(scope);
        }
    }

    pub fn run_after(&self, scope: &mut Scope) {
        for registration in self.chain(scope.kind()) {
            registration.callback.after(scope);
        }
    }

    fn chain(&self, kind: OperationKind) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(move |r| r.kind == kind)
    }
}

impl fmt::Debug for CallbackChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.registrations
                    .iter()
                    .map(|r| format!("{}:{}", r.kind, r.name)),
            )
            .finish()
    }
}

/// Register [`TracingCallbacks`] on all five chains as `tracing:{kind}`.
pub fn register_tracing_callbacks(chain: &mut CallbackChain, config: Arc<TracingConfig>) {
    let callbacks: Arc<dyn QueryCallback> = Arc::new(TracingCallbacks::new(config));
    for kind in OperationKind::ALL {
        chain.register(kind, format!("tracing:{}", kind.name()), callbacks.clone());
    }
}

pub(crate) fn db_system(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "postgresql",
        DbBackend::MySql => "mysql",
        DbBackend::Sqlite => "sqlite",
    }
}

/// Opens a `sql` span under the scope's parent span before the statement runs
/// and annotates and closes it afterwards.
///
/// Without a parent span both hooks do nothing.
#[derive(Debug, Clone)]
pub struct TracingCallbacks {
    config: Arc<TracingConfig>,
}

impl TracingCallbacks {
    pub fn new(config: Arc<TracingConfig>) -> Self {
        Self { config }
    }
}

/// The span statements should be children of: the explicit one, else the
/// current span when the config allows it. Disabled spans count as absent.
pub(crate) fn resolve_parent(explicit: Option<&Span>, config: &TracingConfig) -> Option<Span> {
    let parent = match explicit {
        Some(parent) => parent.clone(),
        None if config.inherit_current_span => Span::current(),
        None => return None,
    };
    (!parent.is_disabled()).then_some(parent)
}

impl QueryCallback for TracingCallbacks {
    fn before(&self, scope: &mut Scope) {
        let Some(parent) = resolve_parent(scope.parent_span(), &self.config) else {
            return;
        };

        let parsed = ParsedSql::parse(scope.sql());
        let span = tracing::info_span!(
            parent: &parent,
            "sql",
            "otel.name" = %parsed.span_name(),
            "db.type" = "sql",
            "db.system" = db_system(scope.backend()),
            "db.statement" = field::Empty,
            "db.table" = field::Empty,
            "db.method" = field::Empty,
            "db.err" = field::Empty,
            "db.count" = field::Empty,
            "db.duration_ms" = field::Empty,
            "db.name" = field::Empty,
            "server.address" = field::Empty,
            "server.port" = field::Empty,
            "peer.service" = field::Empty,
            "error" = field::Empty,
            "error.message" = field::Empty,
            "otel.status_code" = field::Empty,
            "slow_query" = field::Empty,
        );

        if let Some(db_name) = &self.config.database_name {
            span.record("db.name", db_name.as_str());
        }
        if let Some(addr) = &self.config.server_address {
            span.record("server.address", addr.as_str());
        }
        if let Some(port) = self.config.server_port {
            span.record("server.port", port as i64);
        }
        if let Some(peer) = &self.config.peer_service {
            span.record("peer.service", peer.as_str());
        }

        scope.set_span(span);
    }

    fn after(&self, scope: &mut Scope) {
        let Some(span) = scope.take_span() else {
            return;
        };

        let failed = scope.has_error();
        span.record("error", failed);

        if self.config.log_statements {
            span.record("db.statement", scope.sql());
        }

        if self.config.log_parameters && !scope.values().is_empty() {
            if let Some(vars) = sql_vars::encode(scope.values(), scope.truncation()) {
                tracing::info!(parent: &span, db.sql_vars = %vars, "sql vars");
            }
        }

        if let Some(table) = scope.table_name() {
            span.record("db.table", table.as_str());
        }
        span.record("db.method", scope.kind().method(scope.sql()).as_str());
        span.record("db.err", failed);
        if self.config.record_row_counts {
            span.record("db.count", scope.rows_affected());
        }

        let duration_ms = scope.elapsed().as_millis() as i64;
        span.record("db.duration_ms", duration_ms);
        if scope.elapsed() > self.config.slow_query_threshold {
            span.record("slow_query", true);
            tracing::warn!(
                parent: &span,
                duration_ms,
                threshold_ms = self.config.slow_query_threshold.as_millis() as i64,
                "Slow query detected"
            );
        }

        match scope.error() {
            None => {
                span.record("otel.status_code", "OK");
            }
            Some(message) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.message", message);
                tracing::error!(parent: &span, error = %message, "Database query failed");
            }
        }

        // Dropping the last handle closes the span.
        drop(span);
    }
}
