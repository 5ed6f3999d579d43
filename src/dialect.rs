//! SQL dialect adapter. This engine targets SQLite only, so
//! [`SqliteDialect`] is the sole implementation, but the trait boundary is
//! kept so the DDL synthesizer, translator, and repository never embed
//! SQLite-specific string literals directly.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::mapping::{ColumnMapping, SqlType};

/// A canonical, dialect-agnostic parameter value. Produced by
/// [`SqlDialect::convert_parameter_value`] and consumed by the repository
/// when binding `rusqlite` parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Temporal(DateTime<Utc>),
}

impl SqlValue {
    #[must_use]
    pub fn as_rusqlite(&self) -> rusqlite::types::Value {
        match self {
            Self::Null => rusqlite::types::Value::Null,
            Self::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            Self::Int(i) => rusqlite::types::Value::Integer(*i),
            Self::Real(r) => rusqlite::types::Value::Real(*r),
            Self::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Self::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
            Self::Temporal(t) => rusqlite::types::Value::Text(t.to_rfc3339()),
        }
    }
}

/// Contract a SQL dialect adapter fulfils for the rest of the engine.
pub trait SqlDialect: Send + Sync {
    /// Quote `identifier` if it is a reserved word or contains characters
    /// outside `[A-Za-z0-9_]`, else return it unchanged.
    fn escape_identifier(&self, identifier: &str) -> String;

    /// The dialect SQL type keyword for a column's abstract type.
    fn sql_type_of(&self, column: &ColumnMapping) -> String;

    fn auto_increment_keyword(&self) -> &'static str;

    fn current_timestamp_expr(&self) -> &'static str;

    fn boolean_literal(&self, value: bool) -> &'static str;

    fn parameter_prefix(&self) -> &'static str;

    /// Wrap `column_expr` in the dialect-safe coercion used to compare
    /// stored temporal text against "now" or another temporal value.
    fn expiry_filter(&self, column_expr: &str) -> String;

    /// Canonical on-wire representation for a typed value: booleans as
    /// 0/1, temporal values as ISO-8601 strings, durations as total
    /// seconds, UUIDs as lowercase hex, enums as their variant name.
    fn convert_parameter_value(&self, value: &SqlValue) -> SqlValue;

    /// The storage-compaction command run by the purge engine's
    /// `optimize_storage` option.
    fn compaction_command(&self) -> &'static str;
}

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// SQLite keywords that require quoting even though they are otherwise
/// valid bare identifiers. Not exhaustive, but covers the ones this
/// engine's own column vocabulary (`Order`, `Key`, `References`, ...)
/// realistically collides with.
const RESERVED_WORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "ATTACH",
    "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST", "CHECK",
    "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT", "DEFERRABLE",
    "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DROP", "EACH", "ELSE", "END", "ESCAPE",
    "EXCEPT", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL", "FOR", "FOREIGN", "FROM", "FULL", "GLOB",
    "GROUP", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED", "INITIALLY",
    "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY", "LEFT",
    "LIKE", "LIMIT", "MATCH", "NATURAL", "NO", "NOT", "NOTNULL", "NULL", "OF", "OFFSET", "ON",
    "OR", "ORDER", "OUTER", "PLAN", "PRAGMA", "PRIMARY", "QUERY", "RAISE", "RECURSIVE",
    "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT", "RIGHT",
    "ROLLBACK", "ROW", "SAVEPOINT", "SELECT", "SET", "TABLE", "TEMP", "TEMPORARY", "THEN", "TO",
    "TRANSACTION", "TRIGGER", "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW",
    "VIRTUAL", "WHEN", "WHERE", "WITH", "WITHOUT",
];

/// The only `SqlDialect` implementation, targeting SQLite's pragma and
/// quoting conventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn escape_identifier(&self, identifier: &str) -> String {
        let needs_quoting = !IDENTIFIER_RE.is_match(identifier)
            || RESERVED_WORDS.contains(&identifier.to_ascii_uppercase().as_str());
        if needs_quoting {
            format!("\"{}\"", identifier.replace('"', "\"\""))
        } else {
            identifier.to_string()
        }
    }

    fn sql_type_of(&self, column: &ColumnMapping) -> String {
        match column.sql_type {
            SqlType::Bool | SqlType::Int64 => "INTEGER".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Decimal => "NUMERIC".to_string(),
            SqlType::Text | SqlType::Uuid | SqlType::Enum | SqlType::Temporal => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Duration => "REAL".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> &'static str {
        "AUTOINCREMENT"
    }

    fn current_timestamp_expr(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn parameter_prefix(&self) -> &'static str {
        "@"
    }

    fn expiry_filter(&self, column_expr: &str) -> String {
        format!("datetime({column_expr})")
    }

    fn convert_parameter_value(&self, value: &SqlValue) -> SqlValue {
        value.clone()
    }

    fn compaction_command(&self) -> &'static str {
        "VACUUM"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_words() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.escape_identifier("order"), "\"order\"");
        assert_eq!(dialect.escape_identifier("Id"), "Id");
    }

    #[test]
    fn escapes_non_identifier_characters() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.escape_identifier("weird-name"), "\"weird-name\"");
    }

    #[test]
    fn expiry_filter_wraps_in_datetime() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.expiry_filter("AbsoluteExpiration"), "datetime(AbsoluteExpiration)");
    }
}
