//! Predicate-to-SQL translator: a small expression AST for filter/order/page
//! queries plus a translator that lowers it to parameterized SQL, shared
//! across every entity type rather than assembled ad hoc per query site.

use crate::dialect::{SqlDialect, SqlValue};
use crate::error::{Result, TranslationError};
use crate::mapping::EntityMapping;

/// A single comparison or combinator node in a filter predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(String, SqlValue),
    NotEq(String, SqlValue),
    Lt(String, SqlValue),
    LtEq(String, SqlValue),
    Gt(String, SqlValue),
    GtEq(String, SqlValue),
    /// Pre-escaped `LIKE` pattern (see [`Self::starts_with`] and friends for
    /// the escaping helpers `starts_with`/`contains`/`ends_with` apply).
    Like(String, String),
    In(String, Vec<SqlValue>),
    IsNull(String),
    IsNotNull(String),
    /// Comparison between two arithmetic expressions over numeric columns,
    /// e.g. `quantity * unit_price > 100` or `balance - reserved >= 0`.
    Compare(NumericExpr, CompareOp, NumericExpr),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    /// Always true; the identity predicate for "no filter".
    All,
}

/// One operand or subexpression in an arithmetic comparison.
#[derive(Debug, Clone)]
pub enum NumericExpr {
    Column(String),
    Literal(SqlValue),
    Add(Box<NumericExpr>, Box<NumericExpr>),
    Sub(Box<NumericExpr>, Box<NumericExpr>),
    Mul(Box<NumericExpr>, Box<NumericExpr>),
    Div(Box<NumericExpr>, Box<NumericExpr>),
}

impl NumericExpr {
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    #[must_use]
    pub fn literal(value: SqlValue) -> Self {
        Self::Literal(value)
    }

    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::Add(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::Sub(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn mul(self, other: Self) -> Self {
        Self::Mul(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn div(self, other: Self) -> Self {
        Self::Div(Box::new(self), Box::new(other))
    }
}

/// Comparison operator for a [`Predicate::Compare`] arithmetic predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Escape `%`, `_`, and the escape character itself in a literal so it can
/// be embedded in a `LIKE` pattern without being interpreted as a wildcard.
fn escape_like_literal(literal: &str) -> String {
    literal.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

impl Predicate {
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// `column LIKE '<literal>%'`, with `%`/`_` in `literal` escaped so they
    /// are matched literally rather than as wildcards.
    #[must_use]
    pub fn starts_with(column: impl Into<String>, literal: &str) -> Self {
        Self::Like(column.into(), format!("{}%", escape_like_literal(literal)))
    }

    /// `column LIKE '%<literal>%'`.
    #[must_use]
    pub fn contains(column: impl Into<String>, literal: &str) -> Self {
        Self::Like(column.into(), format!("%{}%", escape_like_literal(literal)))
    }

    /// `column LIKE '%<literal>'`.
    #[must_use]
    pub fn ends_with(column: impl Into<String>, literal: &str) -> Self {
        Self::Like(column.into(), format!("%{}", escape_like_literal(literal)))
    }
}

/// Sort direction for one key in an [`OrderBy`] clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// An ordered sequence of sort keys, applied left to right (`ORDER BY a, b DESC`).
#[derive(Debug, Clone, Default)]
pub struct OrderBy {
    keys: Vec<(String, SortDirection)>,
}

impl OrderBy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push((column.into(), direction));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Offset/limit pagination window, with an optional deterministic tiebreaker
/// key appended by the translator when the caller's `OrderBy` does not
/// already guarantee a total order.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    #[must_use]
    pub const fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }

    #[must_use]
    pub const fn at(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// The rendered, ready-to-execute product of a translation pass: SQL text
/// plus its positional bind values, in the same order as the `@p0, @p1, ...`
/// placeholders appear in `sql`.
#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Lowers [`Predicate`]/[`OrderBy`]/[`Page`] against one entity's mapping
/// into parameterized SQL, validating every referenced column is mapped.
pub struct Translator<'a> {
    mapping: &'a EntityMapping,
    dialect: &'a dyn SqlDialect,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub fn new(mapping: &'a EntityMapping, dialect: &'a dyn SqlDialect) -> Self {
        Self { mapping, dialect }
    }

    fn escaped_column(&self, name: &str) -> Result<String> {
        if !self.mapping.is_mapped(name) {
            return Err(TranslationError::NotMapped(name.to_string()).into());
        }
        Ok(self.dialect.escape_identifier(name))
    }

    /// Render `predicate` as a `WHERE`-clause fragment (without the `WHERE`
    /// keyword), appending bind values to `params` in encounter order.
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError::NotMapped`] if a referenced column is not
    /// mapped on this entity.
    pub fn translate_predicate(&self, predicate: &Predicate, params: &mut Vec<SqlValue>) -> Result<String> {
        match predicate {
            Predicate::All => Ok("1 = 1".to_string()),
            Predicate::Eq(col, val) => self.binary_clause(col, "=", val, params),
            Predicate::NotEq(col, val) => self.binary_clause(col, "<>", val, params),
            Predicate::Lt(col, val) => self.binary_clause(col, "<", val, params),
            Predicate::LtEq(col, val) => self.binary_clause(col, "<=", val, params),
            Predicate::Gt(col, val) => self.binary_clause(col, ">", val, params),
            Predicate::GtEq(col, val) => self.binary_clause(col, ">=", val, params),
            Predicate::Like(col, pattern) => {
                let column = self.escaped_column(col)?;
                params.push(SqlValue::Text(pattern.clone()));
                Ok(format!(
                    "{column} LIKE {} ESCAPE '\\'",
                    self.placeholder(params.len())
                ))
            }
            Predicate::In(col, values) => {
                let column = self.escaped_column(col)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(self.dialect.convert_parameter_value(v));
                        self.placeholder(params.len())
                    })
                    .collect();
                Ok(format!("{column} IN ({})", placeholders.join(", ")))
            }
            Predicate::IsNull(col) => Ok(format!("{} IS NULL", self.escaped_column(col)?)),
            Predicate::IsNotNull(col) => Ok(format!("{} IS NOT NULL", self.escaped_column(col)?)),
            Predicate::Compare(lhs, op, rhs) => {
                let left = self.render_numeric_expr(lhs, params)?;
                let right = self.render_numeric_expr(rhs, params)?;
                Ok(format!("({left}) {} ({right})", op.as_sql()))
            }
            Predicate::And(lhs, rhs) => {
                let left = self.translate_predicate(lhs, params)?;
                let right = self.translate_predicate(rhs, params)?;
                Ok(format!("({left} AND {right})"))
            }
            Predicate::Or(lhs, rhs) => {
                let left = self.translate_predicate(lhs, params)?;
                let right = self.translate_predicate(rhs, params)?;
                Ok(format!("({left} OR {right})"))
            }
            Predicate::Not(inner) => {
                let rendered = self.translate_predicate(inner, params)?;
                Ok(format!("NOT ({rendered})"))
            }
        }
    }

    /// Whether a binary comparison between `column` and `value` must wrap
    /// both operands in the dialect's temporal coercion: true if the
    /// column's mapped type is `Temporal` or the literal itself is a
    /// `SqlValue::Temporal`.
    fn is_temporal_comparison(&self, column: &str, value: &SqlValue) -> bool {
        let column_is_temporal = self
            .mapping
            .column(column)
            .is_some_and(|c| c.sql_type == crate::mapping::SqlType::Temporal);
        column_is_temporal || matches!(value, SqlValue::Temporal(_))
    }

    fn binary_clause(
        &self,
        column: &str,
        op: &str,
        value: &SqlValue,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let escaped = self.escaped_column(column)?;
        let temporal = self.is_temporal_comparison(column, value);
        params.push(self.dialect.convert_parameter_value(value));
        let placeholder = self.placeholder(params.len());
        if temporal {
            Ok(format!(
                "{} {op} {}",
                self.dialect.expiry_filter(&escaped),
                self.dialect.expiry_filter(&placeholder)
            ))
        } else {
            Ok(format!("{escaped} {op} {placeholder}"))
        }
    }

    /// Render one operand of an arithmetic comparison, validating that any
    /// referenced column is mapped and numeric.
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError::NotMapped`] if a column is unmapped, or
    /// [`TranslationError::UnsupportedOperation`] if a column is mapped but
    /// not a numeric type.
    fn render_numeric_expr(&self, expr: &NumericExpr, params: &mut Vec<SqlValue>) -> Result<String> {
        match expr {
            NumericExpr::Column(name) => {
                let escaped = self.escaped_column(name)?;
                let numeric = self
                    .mapping
                    .column(name)
                    .is_some_and(|c| matches!(c.sql_type, crate::mapping::SqlType::Int64 | crate::mapping::SqlType::Real | crate::mapping::SqlType::Decimal | crate::mapping::SqlType::Duration));
                if !numeric {
                    return Err(TranslationError::UnsupportedOperation(format!(
                        "column '{name}' is not a numeric type and cannot appear in an arithmetic expression"
                    ))
                    .into());
                }
                Ok(escaped)
            }
            NumericExpr::Literal(value) => {
                params.push(self.dialect.convert_parameter_value(value));
                Ok(self.placeholder(params.len()))
            }
            NumericExpr::Add(lhs, rhs) => self.render_numeric_binary(lhs, "+", rhs, params),
            NumericExpr::Sub(lhs, rhs) => self.render_numeric_binary(lhs, "-", rhs, params),
            NumericExpr::Mul(lhs, rhs) => self.render_numeric_binary(lhs, "*", rhs, params),
            NumericExpr::Div(lhs, rhs) => self.render_numeric_binary(lhs, "/", rhs, params),
        }
    }

    fn render_numeric_binary(
        &self,
        lhs: &NumericExpr,
        op: &str,
        rhs: &NumericExpr,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let left = self.render_numeric_expr(lhs, params)?;
        let right = self.render_numeric_expr(rhs, params)?;
        Ok(format!("({left} {op} {right})"))
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("{}p{}", self.dialect.parameter_prefix(), ordinal - 1)
    }

    /// Render an `ORDER BY` clause fragment (without the keyword). Returns
    /// `None` if `order_by` has no keys.
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError::NotMapped`] if a sort key is not mapped.
    pub fn translate_order_by(&self, order_by: &OrderBy) -> Result<Option<String>> {
        if order_by.is_empty() {
            return Ok(None);
        }
        let parts: Result<Vec<String>> = order_by
            .keys
            .iter()
            .map(|(col, dir)| {
                let escaped = self.escaped_column(col)?;
                let dir = match dir {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                };
                Ok(format!("{escaped} {dir}"))
            })
            .collect();
        Ok(Some(parts?.join(", ")))
    }

    /// Build a full `SELECT * FROM <table> WHERE ... ORDER BY ... LIMIT ...
    /// OFFSET ...` query.
    ///
    /// Unless `include_all_versions` is set, rows are first collapsed to the
    /// single highest-`Version` row per logical key via a correlated
    /// subquery, and only that row is then checked against the soft-delete
    /// tombstone filter (`IsDeleted = 0`, unless `include_deleted` is set) —
    /// collapsing before filtering ensures a key whose latest row is a
    /// tombstone doesn't leak its last live version. The expiry filter is
    /// applied independently when the entity has an expiry span and
    /// `include_expired` is false.
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError`] if any referenced column is unmapped.
    #[allow(clippy::too_many_arguments)]
    pub fn translate_select(
        &self,
        predicate: &Predicate,
        order_by: &OrderBy,
        page: Option<Page>,
        include_all_versions: bool,
        include_deleted: bool,
        include_expired: bool,
    ) -> Result<TranslatedQuery> {
        let table = self.dialect.escape_identifier(&self.mapping.table_name);
        let mut params = Vec::new();
        let mut clauses = vec![self.translate_predicate(predicate, &mut params)?];

        if self.mapping.soft_delete_enabled && !include_all_versions {
            if let (Some(id_col), Some(version_col)) =
                (self.mapping.id_column(), self.mapping.audit_fields.version.as_deref())
            {
                let escaped_id = self.dialect.escape_identifier(id_col);
                let escaped_version = self.dialect.escape_identifier(version_col);
                clauses.push(format!(
                    "{escaped_version} = (SELECT MAX({escaped_version}) FROM {table} AS _latest WHERE _latest.{escaped_id} = {table}.{escaped_id})"
                ));
            }
        }

        if self.mapping.soft_delete_enabled && !include_deleted {
            if let Some(col) = &self.mapping.audit_fields.is_deleted {
                let escaped = self.dialect.escape_identifier(col);
                clauses.push(format!("{escaped} = {}", self.dialect.boolean_literal(false)));
            }
        }

        if self.mapping.expiry_span.is_some() && !include_expired {
            if let Some(col) = &self.mapping.audit_fields.absolute_expiration {
                let escaped = self.dialect.escape_identifier(col);
                let filter = self.dialect.expiry_filter(&escaped);
                clauses.push(format!(
                    "({escaped} IS NULL OR {filter} > {})",
                    self.dialect.expiry_filter(self.dialect.current_timestamp_expr())
                ));
            }
        }

        let mut sql = format!("SELECT * FROM {table} WHERE {}", clauses.join(" AND "));

        if let Some(order) = self.translate_order_by(order_by)? {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        if let Some(page) = page {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset));
        }

        Ok(TranslatedQuery { sql, params })
    }

    /// Build a `SELECT count(*) FROM <table> WHERE ...` query applying the
    /// same soft-delete/expiry defaults as [`Self::translate_select`].
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError`] if any referenced column is unmapped.
    pub fn translate_count(
        &self,
        predicate: &Predicate,
        include_all_versions: bool,
        include_deleted: bool,
        include_expired: bool,
    ) -> Result<TranslatedQuery> {
        let mut select = self.translate_select(
            predicate,
            &OrderBy::new(),
            None,
            include_all_versions,
            include_deleted,
            include_expired,
        )?;
        select.sql = select.sql.replacen("SELECT *", "SELECT count(*)", 1);
        Ok(select)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::mapping::{ColumnMapping, EntityMappingBuilder, SqlType};

    fn mapping() -> EntityMapping {
        EntityMappingBuilder::new("widgets")
            .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("Name", SqlType::Text).not_null())
            .column(ColumnMapping::new("Price", SqlType::Real))
            .build()
            .unwrap()
    }

    #[test]
    fn translates_simple_equality() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let sql = translator
            .translate_predicate(&Predicate::Eq("Name".into(), SqlValue::Text("widget".into())), &mut params)
            .unwrap();
        assert_eq!(sql, "Name = @p0");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn rejects_unmapped_column() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let err = translator
            .translate_predicate(&Predicate::Eq("Ghost".into(), SqlValue::Null), &mut params)
            .unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Translation(TranslationError::NotMapped(_))));
    }

    #[test]
    fn translate_select_applies_page_and_order() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let order = OrderBy::new().then_by("Name", SortDirection::Descending);
        let query = translator
            .translate_select(&Predicate::All, &order, Some(Page::at(10, 20)), true, true, true)
            .unwrap();
        assert!(query.sql.contains("ORDER BY Name DESC"));
        assert!(query.sql.contains("LIMIT 20 OFFSET 10"));
    }

    #[test]
    fn temporal_comparison_wraps_both_sides_in_datetime() {
        let mapping = EntityMappingBuilder::new("widgets")
            .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("CreatedTime", SqlType::Temporal).not_null())
            .build()
            .unwrap();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(90);
        let sql = translator
            .translate_predicate(
                &Predicate::Lt("CreatedTime".into(), SqlValue::Temporal(cutoff)),
                &mut params,
            )
            .unwrap();
        assert_eq!(sql, "datetime(CreatedTime) < datetime(@p0)");
        assert_eq!(params.len(), 1);
        assert!(matches!(&params[0], SqlValue::Temporal(_)));
    }

    #[test]
    fn starts_with_escapes_wildcards_and_uses_like_escape_clause() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let sql = translator
            .translate_predicate(&Predicate::starts_with("Name", "50%_off"), &mut params)
            .unwrap();
        assert_eq!(sql, "Name LIKE @p0 ESCAPE '\\'");
        assert_eq!(params[0], SqlValue::Text("50\\%\\_off%".to_string()));
    }

    #[test]
    fn arithmetic_predicate_lowers_to_parenthesized_expression() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let predicate = Predicate::Compare(
            NumericExpr::column("Price").mul(NumericExpr::literal(SqlValue::Real(2.0))),
            CompareOp::Gt,
            NumericExpr::literal(SqlValue::Real(10.0)),
        );
        let sql = translator.translate_predicate(&predicate, &mut params).unwrap();
        assert_eq!(sql, "(Price * @p0) > (@p1)");
        assert_eq!(params, vec![SqlValue::Real(2.0), SqlValue::Real(10.0)]);
    }

    #[test]
    fn arithmetic_predicate_rejects_non_numeric_column() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let predicate = Predicate::Compare(
            NumericExpr::column("Name"),
            CompareOp::Eq,
            NumericExpr::literal(SqlValue::Int(1)),
        );
        let err = translator.translate_predicate(&predicate, &mut params).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Translation(TranslationError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn in_predicate_with_no_values_is_always_false() {
        let mapping = mapping();
        let translator = Translator::new(&mapping, &SqliteDialect);
        let mut params = Vec::new();
        let sql = translator
            .translate_predicate(&Predicate::In("Name".into(), vec![]), &mut params)
            .unwrap();
        assert_eq!(sql, "1 = 0");
    }
}
