//! Configuration for tracing behavior.

use std::time::Duration;

/// Configuration options for the tracing callbacks.
///
/// # Example
///
/// ```rust
/// use sea_orm_query_tracing::TracingConfig;
/// use std::time::Duration;
///
/// let config = TracingConfig::default()
///     .with_parameter_logging(false)
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to record the SQL statement as `db.statement`.
    /// Default: `true`
    pub log_statements: bool,

    /// Whether to emit the bound parameters as a `db.sql_vars` event.
    /// Default: `true`. Attach a [`SqlVarsTruncation`](crate::SqlVarsTruncation)
    /// to the connection to bound their size.
    pub log_parameters: bool,

    /// Statements slower than this get `slow_query = true` and a WARN event.
    /// Default: 500ms
    pub slow_query_threshold: Duration,

    /// Whether to record `db.count`.
    /// Default: `true`
    pub record_row_counts: bool,

    /// Database name recorded as `db.name` (useful for multi-database setups).
    pub database_name: Option<String>,

    /// Recorded as `server.address`.
    pub server_address: Option<String>,

    /// Recorded as `server.port`.
    pub server_port: Option<u16>,

    /// Recorded as `peer.service`, used by some backends to name the service map node.
    pub peer_service: Option<String>,

    /// Fall back to `Span::current()` when no parent span was attached to the
    /// connection. Default: `false`, tracing is off until a parent is attached.
    pub inherit_current_span: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_statements: true,
            log_parameters: true,
            slow_query_threshold: Duration::from_millis(500),
            record_row_counts: true,
            database_name: None,
            server_address: None,
            server_port: None,
            peer_service: None,
            inherit_current_span: false,
        }
    }
}

impl TracingConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable SQL statement logging in spans.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Enable or disable parameter logging in spans.
    ///
    /// **Security Warning**: Query parameters often contain user input and
    /// potentially sensitive data.
    pub fn with_parameter_logging(mut self, enabled: bool) -> Self {
        self.log_parameters = enabled;
        self
    }

    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    pub fn with_row_count_recording(mut self, enabled: bool) -> Self {
        self.record_row_counts = enabled;
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Set the server address and port recorded on every span.
    pub fn with_server(mut self, address: impl Into<String>, port: u16) -> Self {
        self.server_address = Some(address.into());
        self.server_port = Some(port);
        self
    }

    pub fn with_peer_service(mut self, name: impl Into<String>) -> Self {
        self.peer_service = Some(name.into());
        self
    }

    /// Use the ambient `tracing` span as parent when none was attached explicitly.
    pub fn with_current_span_fallback(mut self, enabled: bool) -> Self {
        self.inherit_current_span = enabled;
        self
    }

    /// Full logging with a tight slow query threshold.
    ///
    /// **Warning**: Do not use in production as it logs all SQL and parameters.
    pub fn development() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Statement and parameter logging off.
    pub fn production() -> Self {
        Self {
            log_statements: false,
            log_parameters: false,
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::default()
            .with_statement_logging(false)
            .with_database_name("test_db")
            .with_server("db.internal", 5432);

        assert!(!config.log_statements);
        assert!(config.log_parameters);
        assert_eq!(config.database_name.as_deref(), Some("test_db"));
        assert_eq!(config.server_address.as_deref(), Some("db.internal"));
        assert_eq!(config.server_port, Some(5432));
        assert!(!config.inherit_current_span);
    }

    #[test]
    fn test_development_config() {
        let config = TracingConfig::development();
        assert!(config.log_statements);
        assert!(config.log_parameters);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(100));
    }

    #[test]
    fn test_production_config() {
        let config = TracingConfig::production();
        assert!(!config.log_statements);
        assert!(!config.log_parameters);
        assert!(config.record_row_counts);
    }
}
