//! Entity-to-table mapping: the language-neutral `EntityMapping` descriptor
//! and the trait entities implement so the engine can read/write their
//! lifecycle fields without runtime reflection.
//!
//! Rust has no attribute reflection at runtime, so rather than reflecting a
//! type's annotations into a mapping, this module asks callers to build the
//! mapping once via [`EntityMappingBuilder`] and cache it behind a `'static`
//! reference, keyed per type by monomorphization rather than by a runtime
//! type-id table.

use std::sync::OnceLock;

use crate::error::MappingError;

/// Abstract SQL type, independent of dialect. See the abstract-type table:
/// bool/int/float/decimal/text/blob/temporal/duration/uuid/enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bool,
    Int64,
    Real,
    Decimal,
    Text,
    Blob,
    Temporal,
    Duration,
    Uuid,
    /// Enum storage convention: integer discriminant or text variant name.
    /// See [`EnumStorage`] for which convention this engine picked.
    Enum,
}

/// Enum storage convention. This engine always stores enums as their
/// variant name in a `TEXT` column (see DESIGN.md Open Questions) rather
/// than as an integer discriminant, because variant names survive column
/// reordering and are directly legible in ad hoc `sqlite3` inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStorage {
    Text,
}

impl Default for EnumStorage {
    fn default() -> Self {
        Self::Text
    }
}

/// One column in a table, derived from one field of an entity type.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub name: String,
    pub sql_type: SqlType,
    pub size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    pub default: Option<String>,
    pub computed_expr: Option<ComputedColumn>,
    pub is_primary_key: bool,
    pub pk_order: Option<u32>,
    pub is_auto_increment: bool,
    pub not_mapped: bool,
}

/// A computed (generated) column expression.
#[derive(Debug, Clone)]
pub struct ComputedColumn {
    pub expression: String,
    pub stored: bool,
}

impl ColumnMapping {
    /// Start building a column named `name` with the given abstract type.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size: None,
            precision: None,
            scale: None,
            nullable: true,
            default: None,
            computed_expr: None,
            is_primary_key: false,
            pk_order: None,
            is_auto_increment: false,
            not_mapped: false,
        }
    }

    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, order: u32) -> Self {
        self.is_primary_key = true;
        self.pk_order = Some(order);
        self.nullable = false;
        self
    }

    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    #[must_use]
    pub fn sized(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn decimal(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// Foreign-key cascade behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ForeignKeyAction {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKeyMapping {
    pub name: String,
    pub from_columns: Vec<String>,
    pub to_table: String,
    pub to_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

#[derive(Debug, Clone)]
pub struct IndexColumn {
    pub name: String,
    pub ascending: bool,
}

#[derive(Debug, Clone)]
pub struct IndexMapping {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    pub included_columns: Vec<String>,
    pub partial_where: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckMapping {
    pub name: String,
    pub expression: String,
}

/// Semantic roles recognized on audit/lifecycle columns.
#[derive(Debug, Clone, Default)]
pub struct AuditFields {
    pub version: Option<String>,
    pub creation_time: Option<String>,
    pub last_write_time: Option<String>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub is_deleted: Option<String>,
    pub absolute_expiration: Option<String>,
    pub is_archived: Option<String>,
}

/// Immutable, process-wide-cacheable descriptor of how an entity type
/// projects onto a relational table.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub table_name: String,
    pub soft_delete_enabled: bool,
    pub expiry_span: Option<chrono::Duration>,
    pub enable_archive: bool,
    pub enable_audit_trail: bool,
    pub sync_with_list: bool,
    pub columns: Vec<ColumnMapping>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexMapping>,
    pub foreign_keys: Vec<ForeignKeyMapping>,
    pub checks: Vec<CheckMapping>,
    pub audit_fields: AuditFields,
}

impl EntityMapping {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn is_mapped(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| !c.not_mapped)
    }

    /// The primary-key column used for single-column lookups; for
    /// soft-delete entities this is the logical id column (not `Version`,
    /// which also participates in the composite primary key).
    #[must_use]
    pub fn id_column(&self) -> Option<&str> {
        self.primary_key
            .iter()
            .find(|c| c.as_str() != "Version")
            .map(String::as_str)
    }
}

/// Builder used once per entity type (invoked from a `OnceLock`-cached
/// static accessor) to assemble and validate an [`EntityMapping`].
#[derive(Debug, Default)]
pub struct EntityMappingBuilder {
    table_name: String,
    soft_delete_enabled: bool,
    expiry_span: Option<chrono::Duration>,
    enable_archive: bool,
    enable_audit_trail: bool,
    sync_with_list: bool,
    columns: Vec<ColumnMapping>,
    indexes: Vec<IndexMapping>,
    foreign_keys: Vec<ForeignKeyMapping>,
    checks: Vec<CheckMapping>,
}

impl EntityMappingBuilder {
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn soft_delete(mut self, enabled: bool) -> Self {
        self.soft_delete_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn expiry_span(mut self, span: chrono::Duration) -> Self {
        self.expiry_span = Some(span);
        self
    }

    #[must_use]
    pub const fn enable_archive(mut self, enabled: bool) -> Self {
        self.enable_archive = enabled;
        self
    }

    #[must_use]
    pub const fn enable_audit_trail(mut self, enabled: bool) -> Self {
        self.enable_audit_trail = enabled;
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn index(mut self, index: IndexMapping) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeyMapping) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    #[must_use]
    pub fn check(mut self, check: CheckMapping) -> Self {
        self.checks.push(check);
        self
    }

    /// Validate and assemble the mapping: soft-delete requires
    /// `Version`+`IsDeleted` with `Version` in the PK; expiry requires
    /// `CreationTime`+`AbsoluteExpiration`, archive further requires
    /// `IsArchived`; auto-increment PK must be the sole PK column.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] describing the first invariant violated.
    pub fn build(self) -> Result<EntityMapping, MappingError> {
        if self.table_name.trim().is_empty() {
            return Err(MappingError::EmptyTableName);
        }

        let mut audit_fields = AuditFields::default();
        for col in &self.columns {
            match col.name.as_str() {
                "Version" => audit_fields.version = Some(col.name.clone()),
                "CreationTime" => audit_fields.creation_time = Some(col.name.clone()),
                "LastWriteTime" => audit_fields.last_write_time = Some(col.name.clone()),
                "CreatedBy" => audit_fields.created_by = Some(col.name.clone()),
                "ModifiedBy" => audit_fields.modified_by = Some(col.name.clone()),
                "IsDeleted" => audit_fields.is_deleted = Some(col.name.clone()),
                "AbsoluteExpiration" => audit_fields.absolute_expiration = Some(col.name.clone()),
                "IsArchived" => audit_fields.is_archived = Some(col.name.clone()),
                _ => {}
            }
        }

        if self.soft_delete_enabled {
            let version = self
                .columns
                .iter()
                .find(|c| c.name == "Version" && !c.not_mapped && c.sql_type == SqlType::Int64);
            if version.is_none() {
                return Err(MappingError::MissingVersion);
            }
            if audit_fields.is_deleted.is_none() {
                return Err(MappingError::MissingVersion);
            }
        }

        if self.expiry_span.is_some() {
            let creation = self.columns.iter().find(|c| {
                c.name == "CreationTime" && !c.not_mapped && c.sql_type == SqlType::Temporal
            });
            if creation.is_none() {
                return Err(MappingError::MissingCreationTime);
            }
            let expiration = self.columns.iter().find(|c| {
                c.name == "AbsoluteExpiration"
                    && !c.not_mapped
                    && c.sql_type == SqlType::Temporal
                    && c.nullable
            });
            if expiration.is_none() {
                return Err(MappingError::MissingAbsoluteExpiration);
            }
            if self.enable_archive {
                let archived = self
                    .columns
                    .iter()
                    .find(|c| c.name == "IsArchived" && !c.not_mapped && c.sql_type == SqlType::Bool);
                if archived.is_none() {
                    return Err(MappingError::MissingIsArchived);
                }
            }
        }

        let mut pk_cols: Vec<&ColumnMapping> =
            self.columns.iter().filter(|c| c.is_primary_key).collect();
        pk_cols.sort_by_key(|c| c.pk_order.unwrap_or(u32::MAX));

        if self.soft_delete_enabled && !pk_cols.iter().any(|c| c.name == "Version") {
            return Err(MappingError::MissingVersion);
        }

        let auto_inc: Vec<&&ColumnMapping> =
            pk_cols.iter().filter(|c| c.is_auto_increment).collect();
        if auto_inc.len() == 1 && pk_cols.len() != 1 {
            return Err(MappingError::InvalidAutoIncrementKey {
                column: auto_inc[0].name.clone(),
            });
        }

        let primary_key = pk_cols.iter().map(|c| c.name.clone()).collect();

        Ok(EntityMapping {
            table_name: self.table_name,
            soft_delete_enabled: self.soft_delete_enabled,
            expiry_span: self.expiry_span,
            enable_archive: self.enable_archive,
            enable_audit_trail: self.enable_audit_trail,
            sync_with_list: self.sync_with_list,
            columns: self.columns,
            primary_key,
            indexes: self.indexes,
            foreign_keys: self.foreign_keys,
            checks: self.checks,
            audit_fields,
        })
    }
}

/// Entities persisted through a [`crate::repository::Repository`] implement
/// this trait to expose the lifecycle fields the engine manages: version,
/// soft-delete tombstone flag, creation/write timestamps, and expiry. This
/// is the capability-set trait strategy from the design notes, replacing a
/// polymorphic base-entity hierarchy with targeted accessor methods.
pub trait MappedEntity: Clone + Send + Sync + 'static {
    /// The logical primary-key type (excluding `Version` for soft-delete
    /// entities, per [`EntityMapping::id_column`]).
    type Id: Clone + std::fmt::Display + Send + Sync + rusqlite::ToSql + 'static;

    /// Stable identifier for process-wide mapping cache lookups and error
    /// messages (the entity type's "short name").
    fn type_name() -> &'static str;

    /// Build this type's mapping. Called at most once; the result is cached
    /// behind a `OnceLock` by [`mapping_of`].
    fn build_mapping() -> Result<EntityMapping, MappingError>;

    /// The entity's logical identifier (the primary-key column(s) other than
    /// `Version`).
    fn id(&self) -> Self::Id;

    /// Column name → bind value for every mapped (non-`not_mapped`) column,
    /// in the order the caller chooses to supply them. Rust has no field
    /// reflection, so this is an explicit, name-keyed form the repository
    /// can drive generically from the mapping's column list.
    fn column_values(&self) -> Vec<(&'static str, crate::dialect::SqlValue)>;

    /// Hydrate an entity from one row of a `SELECT *` over its mapped
    /// table.
    ///
    /// # Errors
    ///
    /// Returns a `rusqlite::Error` if a column is missing or of the wrong
    /// stored type.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>
    where
        Self: Sized;

    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    fn is_deleted(&self) -> bool {
        false
    }
    fn set_is_deleted(&mut self, _deleted: bool) {}

    fn created_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
    fn set_created_time(&mut self, _time: chrono::DateTime<chrono::Utc>) {}

    fn last_write_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
    fn set_last_write_time(&mut self, _time: chrono::DateTime<chrono::Utc>) {}

    fn absolute_expiration(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        None
    }
    fn set_absolute_expiration(&mut self, _time: Option<chrono::DateTime<chrono::Utc>>) {}

    fn is_archived(&self) -> bool {
        false
    }
    fn set_is_archived(&mut self, _archived: bool) {}
}

/// Process-wide registry backing [`mapping_of`]: one cached mapping (or
/// build failure) per concrete entity type, keyed by `TypeId` since Rust
/// gives us no generic `static` storage per monomorphization without
/// leaking. This is the one documented piece of global mutable state the
/// design notes permit, and [`clear_mapping_cache`] is its test-only reset
/// hook.
type MappingRegistry = std::sync::Mutex<std::collections::HashMap<std::any::TypeId, EntityMapping>>;

fn registry() -> &'static MappingRegistry {
    static REGISTRY: OnceLock<MappingRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()))
}

/// Accessor for the process-wide cached mapping of entity type `E`.
///
/// Builds and validates the mapping via `E::build_mapping` on first use and
/// caches the result; subsequent calls are a map lookup plus a clone (cheap:
/// `EntityMapping` is a handful of small vectors). Invalid mappings fail on
/// every call rather than being cached as a poison value, so a caller that
/// fixes a mapping and calls `clear_mapping_cache` can retry successfully.
///
/// # Errors
///
/// Returns the [`MappingError`] from `E::build_mapping` when the mapping is
/// invalid.
pub fn mapping_of<E: MappedEntity>() -> Result<EntityMapping, MappingError> {
    let type_id = std::any::TypeId::of::<E>();
    {
        let guard = registry().lock().expect("mapping registry mutex poisoned");
        if let Some(mapping) = guard.get(&type_id) {
            return Ok(mapping.clone());
        }
    }

    let mapping = E::build_mapping()?;
    let mut guard = registry().lock().expect("mapping registry mutex poisoned");
    guard.entry(type_id).or_insert_with(|| mapping.clone());
    Ok(mapping)
}

/// Clear the process-wide mapping cache. Used only by the test harness to
/// reset state between tests; never call this from production code.
pub fn clear_mapping_cache() {
    registry().lock().expect("mapping registry mutex poisoned").clear();
}
