//! DDL synthesis: turns an [`EntityMapping`] into idempotent
//! `CREATE TABLE`/`CREATE INDEX` statements, plus small migration helpers
//! (`ensure_column`/`column_exists`) for adding columns to an existing
//! table, synthesized data-driven from a mapping instead of a literal
//! schema string.

use rusqlite::Connection;

use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::mapping::EntityMapping;

/// Render the `CREATE TABLE IF NOT EXISTS` statement for `mapping`.
#[must_use]
pub fn create_table_sql(mapping: &EntityMapping, dialect: &dyn SqlDialect) -> String {
    let table = dialect.escape_identifier(&mapping.table_name);
    let mut lines = Vec::new();

    let single_autoinc_pk = mapping.primary_key.len() == 1
        && mapping
            .columns
            .iter()
            .find(|c| c.name == mapping.primary_key[0])
            .is_some_and(|c| c.is_auto_increment);

    for column in &mapping.columns {
        if column.not_mapped {
            continue;
        }
        let mut line = format!(
            "{} {}",
            dialect.escape_identifier(&column.name),
            dialect.sql_type_of(column)
        );

        if single_autoinc_pk && column.name == mapping.primary_key[0] {
            line.push_str(" PRIMARY KEY ");
            line.push_str(dialect.auto_increment_keyword());
        }

        if let Some(computed) = &column.computed_expr {
            let kind = if computed.stored { "STORED" } else { "VIRTUAL" };
            line.push_str(&format!(
                " GENERATED ALWAYS AS ({}) {kind}",
                computed.expression
            ));
        } else {
            if !column.nullable && !(single_autoinc_pk && column.name == mapping.primary_key[0]) {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                line.push_str(&format!(" DEFAULT {default}"));
            }
        }

        lines.push(line);
    }

    if !single_autoinc_pk && !mapping.primary_key.is_empty() {
        let cols: Vec<String> = mapping
            .primary_key
            .iter()
            .map(|c| dialect.escape_identifier(c))
            .collect();
        lines.push(format!("PRIMARY KEY({})", cols.join(", ")));
    }

    for fk in &mapping.foreign_keys {
        let from: Vec<String> = fk
            .from_columns
            .iter()
            .map(|c| dialect.escape_identifier(c))
            .collect();
        let to: Vec<String> = fk
            .to_columns
            .iter()
            .map(|c| dialect.escape_identifier(c))
            .collect();
        lines.push(format!(
            "FOREIGN KEY({}) REFERENCES {}({}) ON DELETE {} ON UPDATE {}",
            from.join(", "),
            dialect.escape_identifier(&fk.to_table),
            to.join(", "),
            fk.on_delete.as_sql(),
            fk.on_update.as_sql(),
        ));
    }

    for check in &mapping.checks {
        lines.push(format!("CHECK ({})", check.expression));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
        lines.join(",\n    ")
    )
}

/// Render one `CREATE INDEX IF NOT EXISTS` statement per index on `mapping`.
#[must_use]
pub fn create_index_sql(mapping: &EntityMapping, dialect: &dyn SqlDialect) -> Vec<String> {
    let table = dialect.escape_identifier(&mapping.table_name);
    mapping
        .indexes
        .iter()
        .map(|index| {
            let unique = if index.unique { "UNIQUE " } else { "" };
            let cols: Vec<String> = index
                .columns
                .iter()
                .map(|c| {
                    let dir = if c.ascending { "ASC" } else { "DESC" };
                    format!("{} {dir}", dialect.escape_identifier(&c.name))
                })
                .collect();
            let mut sql = format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {table}({})",
                dialect.escape_identifier(&index.name),
                cols.join(", ")
            );
            if let Some(predicate) = &index.partial_where {
                sql.push_str(&format!(" WHERE {predicate}"));
            }
            sql.push(';');
            sql
        })
        .collect()
}

/// Create the table and all indexes for `mapping` if they do not already
/// exist. Idempotent: running this twice against the same mapping is a
/// no-op, so callers may re-run it freely on every open.
///
/// # Errors
///
/// Returns an error if any DDL statement fails to execute.
pub fn ensure_schema(conn: &Connection, mapping: &EntityMapping, dialect: &dyn SqlDialect) -> Result<()> {
    let mut script = create_table_sql(mapping, dialect);
    for index_sql in create_index_sql(mapping, dialect) {
        script.push('\n');
        script.push_str(&index_sql);
    }
    conn.execute_batch(&script)?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?")
        .and_then(|mut stmt| stmt.exists([table]))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    // `pragma_table_info` cannot bind the table name as a parameter; the
    // caller is responsible for passing only known-good table names (every
    // call site here passes `mapping.table_name`, never user input).
    let sql = format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?");
    conn.prepare(&sql).and_then(|mut stmt| stmt.exists([column]))
}

/// Idempotently add `column` to `table` with the given DDL fragment
/// (e.g. `"TEXT"`, `"INTEGER DEFAULT 0"`) if it does not already exist.
/// Used by the DDL synthesizer's own re-run path and by the bulk export
/// pipeline's `MarkAsExported` column.
///
/// # Errors
///
/// Returns an error if the table is missing or the `ALTER TABLE` fails.
pub fn ensure_column(conn: &Connection, table: &str, column: &str, ddl_fragment: &str) -> Result<()> {
    if !table_exists(conn, table)? {
        return Err(crate::error::EngineError::ArgumentInvalid(format!(
            "table `{table}` does not exist"
        )));
    }
    if !column_exists(conn, table, column)? {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl_fragment}");
        conn.execute(&sql, [])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::mapping::{ColumnMapping, EntityMappingBuilder, IndexColumn, IndexMapping, SqlType};

    fn sample_mapping() -> EntityMapping {
        EntityMappingBuilder::new("widgets")
            .column(
                ColumnMapping::new("Id", SqlType::Text)
                    .primary_key(0)
                    .not_null(),
            )
            .column(ColumnMapping::new("Name", SqlType::Text).not_null())
            .column(ColumnMapping::new("Price", SqlType::Decimal).decimal(18, 2))
            .index(IndexMapping {
                name: "idx_widgets_name".to_string(),
                columns: vec![IndexColumn {
                    name: "Name".to_string(),
                    ascending: true,
                }],
                unique: false,
                included_columns: vec![],
                partial_where: None,
            })
            .build()
            .expect("valid mapping")
    }

    #[test]
    fn create_table_sql_is_idempotent_ddl() {
        let mapping = sample_mapping();
        let sql = create_table_sql(&mapping, &SqliteDialect);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS widgets"));
        assert!(sql.contains("PRIMARY KEY(Id)"));
    }

    #[test]
    fn ensure_schema_runs_twice_without_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mapping = sample_mapping();
        ensure_schema(&conn, &mapping, &SqliteDialect).unwrap();
        ensure_schema(&conn, &mapping, &SqliteDialect).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='widgets'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn ensure_column_adds_missing_column_once() {
        let conn = Connection::open_in_memory().unwrap();
        let mapping = sample_mapping();
        ensure_schema(&conn, &mapping, &SqliteDialect).unwrap();

        ensure_column(&conn, "widgets", "ExportedDate", "TEXT").unwrap();
        ensure_column(&conn, "widgets", "ExportedDate", "TEXT").unwrap();

        let cols: Vec<String> = conn
            .prepare("PRAGMA table_info(widgets)")
            .unwrap()
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(cols.iter().filter(|c| *c == "ExportedDate").count(), 1);
    }
}
