//! Lightweight SQL inspection: statement verb, first keyword and primary table.

use once_cell::sync::Lazy;
use regex::Regex;

/// Statement verb as read from the start of the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Begin,
    Commit,
    Rollback,
    Set,
    Other,
}

impl SqlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Create => "CREATE",
            SqlOperation::Drop => "DROP",
            SqlOperation::Alter => "ALTER",
            SqlOperation::Truncate => "TRUNCATE",
            SqlOperation::Begin => "BEGIN",
            SqlOperation::Commit => "COMMIT",
            SqlOperation::Rollback => "ROLLBACK",
            SqlOperation::Set => "SET",
            SqlOperation::Other => "QUERY",
        }
    }

    /// Parse the verb of a statement. Case-insensitive, leading whitespace ignored.
    pub fn from_sql(sql: &str) -> Self {
        let word = sql.split_whitespace().next().unwrap_or("");
        let is = |keyword: &str| word.eq_ignore_ascii_case(keyword);

        if is("SELECT") || is("WITH") {
            SqlOperation::Select
        } else if is("INSERT") {
            SqlOperation::Insert
        } else if is("UPDATE") {
            SqlOperation::Update
        } else if is("DELETE") {
            SqlOperation::Delete
        } else if is("CREATE") {
            SqlOperation::Create
        } else if is("DROP") {
            SqlOperation::Drop
        } else if is("ALTER") {
            SqlOperation::Alter
        } else if is("TRUNCATE") {
            SqlOperation::Truncate
        } else if is("BEGIN") || is("START") {
            SqlOperation::Begin
        } else if is("COMMIT") {
            SqlOperation::Commit
        } else if is("ROLLBACK") {
            SqlOperation::Rollback
        } else if is("SET") {
            SqlOperation::Set
        } else {
            SqlOperation::Other
        }
    }

    fn table_pattern(&self) -> Option<&'static Regex> {
        let regex = match self {
            SqlOperation::Select => &*FROM_TABLE,
            SqlOperation::Insert => &*INSERT_TABLE,
            SqlOperation::Update => &*UPDATE_TABLE,
            SqlOperation::Delete => &*DELETE_TABLE,
            SqlOperation::Create => &*CREATE_TABLE,
            SqlOperation::Drop => &*DROP_TABLE,
            SqlOperation::Alter => &*ALTER_TABLE,
            SqlOperation::Truncate => &*TRUNCATE_TABLE,
            _ => return None,
        };
        Some(regex)
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Identifier optionally wrapped in `...`, "..." or [...], optionally
// schema-qualified; the last segment is captured.
macro_rules! table_regex {
    ($prefix:literal) => {
        Lazy::new(|| {
            Regex::new(concat!(
                "(?i)",
                $prefix,
                r#"(?:[`"\[]?\w+[`"\]]?\.)?[`"\[]?(\w+)[`"\]]?"#
            ))
            .unwrap()
        })
    };
}

static FROM_TABLE: Lazy<Regex> = table_regex!(r"\bFROM\s+");
static INSERT_TABLE: Lazy<Regex> = table_regex!(r"\bINSERT\s+INTO\s+");
static UPDATE_TABLE: Lazy<Regex> = table_regex!(r"\bUPDATE\s+");
static DELETE_TABLE: Lazy<Regex> = table_regex!(r"\bDELETE\s+FROM\s+");
static CREATE_TABLE: Lazy<Regex> = table_regex!(
    r"\bCREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?"
);
static DROP_TABLE: Lazy<Regex> = table_regex!(r"\bDROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?");
static ALTER_TABLE: Lazy<Regex> = table_regex!(r"\bALTER\s+TABLE\s+");
static TRUNCATE_TABLE: Lazy<Regex> = table_regex!(r"\bTRUNCATE\s+(?:TABLE\s+)?");

/// Uppercased first space-separated word of a statement.
///
/// Raw-row queries have no fixed verb, so this is what ends up as their `db.method`.
pub fn first_keyword(sql: &str) -> String {
    sql.trim_start()
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Extract the primary table name from a SQL query, lowercased.
///
/// Returns `None` if the table cannot be determined.
pub fn extract_table(sql: &str) -> Option<String> {
    SqlOperation::from_sql(sql)
        .table_pattern()?
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Verb and table of one statement.
#[derive(Debug, Clone)]
pub struct ParsedSql {
    pub operation: SqlOperation,
    pub table: Option<String>,
}

impl ParsedSql {
    pub fn parse(sql: &str) -> Self {
        Self {
            operation: SqlOperation::from_sql(sql),
            table: extract_table(sql),
        }
    }

    /// `otel.name` for the statement: "{OPERATION} {table}" or "{OPERATION}".
    pub fn span_name(&self) -> String {
        match &self.table {
            Some(table) => format!("{} {}", self.operation, table),
            None => self.operation.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbs() {
        assert_eq!(SqlOperation::from_sql("SELECT * FROM users"), SqlOperation::Select);
        assert_eq!(SqlOperation::from_sql("  select id from orders"), SqlOperation::Select);
        assert_eq!(
            SqlOperation::from_sql("WITH cte AS (SELECT 1) SELECT * FROM cte"),
            SqlOperation::Select
        );
        assert_eq!(
            SqlOperation::from_sql("INSERT INTO users (name) VALUES ($1)"),
            SqlOperation::Insert
        );
        assert_eq!(
            SqlOperation::from_sql("update users set name = $1"),
            SqlOperation::Update
        );
        assert_eq!(
            SqlOperation::from_sql("DELETE FROM users WHERE id = 1"),
            SqlOperation::Delete
        );
        assert_eq!(SqlOperation::from_sql("EXPLAIN SELECT 1"), SqlOperation::Other);
        assert_eq!(SqlOperation::from_sql(""), SqlOperation::Other);
    }

    #[test]
    fn test_transaction_verbs() {
        assert_eq!(SqlOperation::from_sql("BEGIN"), SqlOperation::Begin);
        assert_eq!(SqlOperation::from_sql("START TRANSACTION"), SqlOperation::Begin);
        assert_eq!(SqlOperation::from_sql("COMMIT"), SqlOperation::Commit);
        assert_eq!(SqlOperation::from_sql("ROLLBACK"), SqlOperation::Rollback);
    }

    #[test]
    fn test_extract_table() {
        assert_eq!(
            extract_table(r#"SELECT "orders"."id" FROM "Orders" WHERE "orders"."id" = $1"#),
            Some("orders".to_string())
        );
        assert_eq!(
            extract_table("select u.* from users u join orders o on u.id = o.user_id"),
            Some("users".to_string())
        );
        assert_eq!(
            extract_table("INSERT INTO `grades` (student_id, score) VALUES (?, ?)"),
            Some("grades".to_string())
        );
        assert_eq!(
            extract_table("UPDATE [students] SET name = @P1"),
            Some("students".to_string())
        );
        assert_eq!(
            extract_table("DELETE FROM assignments WHERE id = $1"),
            Some("assignments".to_string())
        );
        assert_eq!(
            extract_table("CREATE TABLE IF NOT EXISTS audit_log (id serial)"),
            Some("audit_log".to_string())
        );
        assert_eq!(extract_table("TRUNCATE TABLE sessions"), Some("sessions".to_string()));
        assert_eq!(extract_table("SHOW search_path"), None);
    }

    #[test]
    fn test_extract_schema_qualified_table() {
        assert_eq!(
            extract_table(r#"SELECT "users"."id" FROM "public"."users" WHERE "users"."id" = $1"#),
            Some("users".to_string())
        );
        assert_eq!(
            extract_table(r#"INSERT INTO "billing"."invoices" ("total") VALUES ($1)"#),
            Some("invoices".to_string())
        );
        assert_eq!(
            extract_table("UPDATE app.accounts SET balance = 0"),
            Some("accounts".to_string())
        );
        assert_eq!(
            extract_table("DELETE FROM `shop`.`orders` WHERE id = ?"),
            Some("orders".to_string())
        );
    }

    #[test]
    fn test_first_keyword() {
        assert_eq!(first_keyword("show tables"), "SHOW");
        assert_eq!(first_keyword("  pragma foreign_keys = ON"), "PRAGMA");
        assert_eq!(first_keyword("VACUUM"), "VACUUM");
        assert_eq!(first_keyword(""), "");
    }

    #[test]
    fn test_span_name() {
        assert_eq!(ParsedSql::parse("SELECT * FROM users").span_name(), "SELECT users");
        assert_eq!(ParsedSql::parse("BEGIN").span_name(), "BEGIN");
    }
}
