//! Versioned CRUD engine: create/read/update/delete with optimistic
//! concurrency, soft-delete history, expiration filtering, and archival,
//! wired generically over any [`crate::mapping::MappedEntity`] rather than
//! one hand-mapped table.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use crate::config::EngineConfig;
use crate::ddl;
use crate::dialect::{SqlDialect, SqlValue, SqliteDialect};
use crate::error::{AggregateFailure, EngineError, Result};
use crate::expr::{OrderBy, Page, Predicate, Translator};
use crate::mapping::{mapping_of, EntityMapping, MappedEntity};
use crate::retry::{NoopRetryEvents, RetryEvents, RetryPolicy, SqliteTransientClassifier, TransientClassifier};

/// Cooperative cancellation signal checked between chunks of a long-running
/// batch operation (bulk import/export, purge). Cloning shares the same
/// underlying flag; call [`Self::cancel`] from any thread or signal handler
/// holding a clone to request that an in-progress operation stop at its next
/// checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return [`EngineError::Cancelled`] if cancellation has been requested,
    /// otherwise `Ok(())`. Call at every chunk boundary in a batch loop.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] if [`Self::cancel`] has been
    /// called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Caller identity threaded through every operation, used to stamp
/// `CreatedBy`/`ModifiedBy` audit columns when the mapping recognizes them.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub actor: String,
}

impl CallerContext {
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into() }
    }
}

/// A page of results from [`Repository::query_paged`].
#[derive(Debug, Clone)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub page_number: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

/// Read-filtering overrides for history/tombstone/expiry visibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub include_all_versions: bool,
    pub include_deleted: bool,
    pub include_expired: bool,
}

/// A single entity type's versioned repository. Owns its connection
/// exclusively: the `Mutex` serializes the open/initialize lifecycle and
/// per-operation checkout. It is not a connection pool.
pub struct Repository<E: MappedEntity> {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    mapping: EntityMapping,
    dialect: SqliteDialect,
    retry: RetryPolicy,
    classifier: Box<dyn TransientClassifier>,
    events: Box<dyn RetryEvents>,
    batch_size: usize,
    _marker: PhantomData<E>,
}

const DEFAULT_BATCH_SIZE: usize = 1000;

impl<E: MappedEntity> Repository<E> {
    /// Open (or create) the database at `path`, applying `config`'s pragmas
    /// and ensuring `E`'s schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping is invalid, the connection cannot be
    /// opened, or the schema cannot be created.
    pub fn open(path: &Path, config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()), config)
    }

    /// Open an in-memory database, for tests and ephemeral use.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping is invalid or the schema cannot be
    /// created.
    pub fn open_in_memory(config: &EngineConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, config)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>, config: &EngineConfig) -> Result<Self> {
        let mapping = mapping_of::<E>()?;
        config.apply_pragmas(&conn)?;
        let dialect = SqliteDialect;
        ddl::ensure_schema(&conn, &mapping, &dialect)?;
        if mapping.enable_audit_trail {
            ensure_audit_table(&conn, &mapping)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            mapping,
            dialect,
            retry: config.retry_policy.to_policy()?,
            classifier: Box::new(SqliteTransientClassifier),
            events: Box::new(NoopRetryEvents),
            batch_size: DEFAULT_BATCH_SIZE,
            _marker: PhantomData,
        })
    }

    /// Override the observability hook used around retries (default:
    /// [`NoopRetryEvents`]).
    #[must_use]
    pub fn with_retry_events(mut self, events: Box<dyn RetryEvents>) -> Self {
        self.events = events;
        self
    }

    /// Override the default chunk size used by batch operations (default
    /// 1000).
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    #[must_use]
    pub const fn dialect(&self) -> &SqliteDialect {
        &self.dialect
    }

    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn retry_run<T>(&self, mut op: impl FnMut(&mut Connection) -> Result<T>) -> Result<T> {
        crate::retry::with_retry(&self.retry, self.classifier.as_ref(), self.events.as_ref(), || {
            let mut conn = self.conn.lock().expect("repository connection mutex poisoned");
            op(&mut conn)
        })
    }

    pub(crate) fn id_column(&self) -> &str {
        self.mapping.id_column().unwrap_or("Id")
    }

    /// Insert `entity`, filling `Version = 1`, `CreatedTime = LastWriteTime
    /// = now`, and expiry fields if the mapping configures an `expiry_span`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityAlreadyExists`] on primary-key conflict.
    pub fn create(&self, mut entity: E, caller: &CallerContext) -> Result<E> {
        let now = Utc::now();
        entity.set_version(1);
        entity.set_created_time(now);
        entity.set_last_write_time(now);
        if let Some(span) = self.mapping.expiry_span {
            entity.set_absolute_expiration(Some(now + span));
        }
        entity.set_is_deleted(false);

        self.retry_run(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            self.insert_row(&tx, &entity)?;
            if self.mapping.enable_audit_trail {
                self.record_audit(&tx, "create", &entity.id().to_string(), caller)?;
            }
            tx.commit()?;
            Ok(())
        })
        .map_err(|err| self.wrap_insert_error(err, &entity.id().to_string()))?;
        Ok(entity)
    }

    fn wrap_insert_error(&self, err: EngineError, key: &str) -> EngineError {
        match &err {
            EngineError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                EngineError::EntityAlreadyExists {
                    entity_type: E::type_name().to_string(),
                    key: key.to_string(),
                }
            }
            _ => err,
        }
    }

    fn insert_row(&self, conn: &rusqlite::Connection, entity: &E) -> Result<()> {
        let values = entity.column_values();
        let table = self.dialect.escape_identifier(&self.mapping.table_name);
        let columns: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        let placeholders: Vec<String> = (0..values.len()).map(|i| format!("?{}", i + 1)).collect();
        let escaped_columns: Vec<String> =
            columns.iter().map(|c| self.dialect.escape_identifier(c)).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            escaped_columns.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<rusqlite::types::Value> = values
            .iter()
            .map(|(_, v)| self.dialect.convert_parameter_value(v).as_rusqlite())
            .collect();
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(())
    }

    /// Insert `entities` in chunks of `batch_size` (or the repository's
    /// configured default). All-or-nothing per chunk: any failure rolls
    /// back that chunk's transaction and the whole batch aborts, reporting
    /// every failure seen so far in an [`EngineError::Aggregate`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Aggregate`] if any entity in any chunk fails.
    pub fn create_batch(
        &self,
        entities: Vec<E>,
        caller: &CallerContext,
        batch_size: Option<usize>,
    ) -> Result<Vec<E>> {
        let chunk_size = batch_size.unwrap_or(self.batch_size).max(1);
        let mut created = Vec::with_capacity(entities.len());
        for chunk in entities.chunks(chunk_size) {
            let mut failures = Vec::new();
            let mut chunk_created = Vec::with_capacity(chunk.len());
            for (index, entity) in chunk.iter().enumerate() {
                match self.create(entity.clone(), caller) {
                    Ok(persisted) => chunk_created.push(persisted),
                    Err(err) => failures.push(AggregateFailure {
                        index,
                        key: Some(entity.id().to_string()),
                        error: err.to_string(),
                    }),
                }
            }
            if !failures.is_empty() {
                return Err(EngineError::Aggregate("create_batch".to_string(), failures));
            }
            created.extend(chunk_created);
        }
        Ok(created)
    }

    /// Look up one entity by its logical id, applying the default
    /// soft-delete/expiry read filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: &E::Id) -> Result<Option<E>> {
        let predicate = Predicate::Eq(self.id_column().to_string(), self.id_to_sql_value(id));
        let mut matches = self.query(&predicate, &OrderBy::new(), None, ReadOptions::default())?;
        Ok(matches.pop())
    }

    /// Full version history for `id`, ordered by `Version` ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_by_key(&self, id: &E::Id, options: ReadOptions) -> Result<Vec<E>> {
        let predicate = Predicate::Eq(self.id_column().to_string(), self.id_to_sql_value(id));
        let order = OrderBy::new().then_by("Version", crate::expr::SortDirection::Ascending);
        self.query(&predicate, &order, None, options)
    }

    fn id_to_sql_value(&self, id: &E::Id) -> SqlValue {
        SqlValue::Text(id.to_string())
    }

    /// Query entities matching `predicate`, applying the default
    /// soft-delete/expiry filter unless `options` overrides it.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::TranslationError`] if `predicate` or
    /// `order_by` reference an unmapped column.
    pub fn query(
        &self,
        predicate: &Predicate,
        order_by: &OrderBy,
        page: Option<Page>,
        options: ReadOptions,
    ) -> Result<Vec<E>> {
        let translator = Translator::new(&self.mapping, &self.dialect);
        let query = translator.translate_select(
            predicate,
            order_by,
            page,
            options.include_all_versions,
            options.include_deleted,
            options.include_expired,
        )?;
        self.retry_run(|conn| {
            let mut stmt = conn.prepare(&query.sql)?;
            let params: Vec<rusqlite::types::Value> =
                query.params.iter().map(|v| self.dialect.convert_parameter_value(v).as_rusqlite()).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| E::from_row(row))?
                .collect::<rusqlite::Result<Vec<E>>>()?;
            Ok(rows)
        })
    }

    /// Paged query over entities matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query or count fails.
    pub fn query_paged(
        &self,
        predicate: &Predicate,
        page_size: u64,
        page_number: u64,
        order_by: &OrderBy,
    ) -> Result<PagedResult<E>> {
        let total_count = self.count(predicate, ReadOptions::default())?;
        let page = Page::at(page_number.saturating_mul(page_size), page_size);
        let items = self.query(predicate, order_by, Some(page), ReadOptions::default())?;
        let total_pages = if page_size == 0 { 0 } else { total_count.div_ceil(page_size) };
        Ok(PagedResult { items, page_number, page_size, total_count, total_pages })
    }

    /// Count entities matching `predicate` under the default read filter
    /// (or `options`' overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, predicate: &Predicate, options: ReadOptions) -> Result<u64> {
        let translator = Translator::new(&self.mapping, &self.dialect);
        let query = translator.translate_count(
            predicate,
            options.include_all_versions,
            options.include_deleted,
            options.include_expired,
        )?;
        self.retry_run(|conn| {
            let params: Vec<rusqlite::types::Value> =
                query.params.iter().map(|v| self.dialect.convert_parameter_value(v).as_rusqlite()).collect();
            let count: i64 = conn.query_row(&query.sql, rusqlite::params_from_iter(params), |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    /// Whether any entity matches `predicate` under the default read
    /// filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn exists(&self, predicate: &Predicate) -> Result<bool> {
        Ok(self.count(predicate, ReadOptions::default())? > 0)
    }

    /// Update `entity`, requiring `entity.version() == stored.version()`.
    /// For soft-delete entities this inserts a new row rather than
    /// overwriting; otherwise the single row is updated in place.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EntityNotFound`] if no row exists for the key,
    /// or [`EngineError::ConcurrencyConflict`] if the stored version has
    /// moved on.
    pub fn update(&self, mut entity: E, caller: &CallerContext) -> Result<E> {
        let id = entity.id();
        let expected_version = entity.version();
        let stored = self
            .get(&id)?
            .ok_or_else(|| EngineError::EntityNotFound {
                entity_type: E::type_name().to_string(),
                key: id.to_string(),
            })?;

        if stored.version() != expected_version {
            return Err(EngineError::ConcurrencyConflict {
                entity_type: E::type_name().to_string(),
                key: id.to_string(),
                expected: expected_version,
                actual: stored.version(),
            });
        }

        let now = Utc::now();
        entity.set_version(expected_version + 1);
        entity.set_last_write_time(now);

        self.retry_run(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if self.mapping.soft_delete_enabled {
                self.insert_row(&tx, &entity)?;
            } else {
                self.update_row_in_place(&tx, &entity)?;
            }
            if self.mapping.enable_audit_trail {
                self.record_audit(&tx, "update", &id.to_string(), caller)?;
            }
            tx.commit()?;
            Ok(())
        })?;
        Ok(entity)
    }

    fn update_row_in_place(&self, conn: &rusqlite::Connection, entity: &E) -> Result<()> {
        let values = entity.column_values();
        let table = self.dialect.escape_identifier(&self.mapping.table_name);
        let id_col = self.dialect.escape_identifier(self.id_column());

        let mut set_clauses = Vec::with_capacity(values.len());
        let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(values.len() + 1);
        for (name, value) in &values {
            set_clauses.push(format!("{} = ?{}", self.dialect.escape_identifier(name), params.len() + 1));
            params.push(self.dialect.convert_parameter_value(value).as_rusqlite());
        }
        let id_placeholder = params.len() + 1;
        params.push(SqlValue::Text(entity.id().to_string()).as_rusqlite());

        let sql = format!(
            "UPDATE {table} SET {} WHERE {id_col} = ?{id_placeholder}",
            set_clauses.join(", ")
        );
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        Ok(())
    }

    /// Apply `transform` to each currently-stored entity matching `ids`,
    /// then `update` it with the freshly read version. A failure anywhere
    /// aborts the whole batch, as with [`Self::create_batch`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Aggregate`] if any entity fails to update.
    pub fn update_batch(
        &self,
        ids: &[E::Id],
        mut transform: impl FnMut(&mut E),
        caller: &CallerContext,
    ) -> Result<Vec<E>> {
        let mut updated = Vec::with_capacity(ids.len());
        let mut failures = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            let result = (|| -> Result<E> {
                let mut entity = self.get(id)?.ok_or_else(|| EngineError::EntityNotFound {
                    entity_type: E::type_name().to_string(),
                    key: id.to_string(),
                })?;
                transform(&mut entity);
                self.update(entity, caller)
            })();
            match result {
                Ok(entity) => updated.push(entity),
                Err(err) => failures.push(AggregateFailure {
                    index,
                    key: Some(id.to_string()),
                    error: err.to_string(),
                }),
            }
        }
        if !failures.is_empty() {
            return Err(EngineError::Aggregate("update_batch".to_string(), failures));
        }
        Ok(updated)
    }

    /// Delete the entity with logical key `id`. Idempotent: returns `true`
    /// whether or not the row existed beforehand. Soft-delete writes a
    /// tombstone row (`Version + 1, IsDeleted = true`); otherwise the row is
    /// physically removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying delete/insert fails.
    pub fn delete(&self, id: &E::Id, caller: &CallerContext) -> Result<bool> {
        let Some(stored) = self.get(id)? else {
            return Ok(true);
        };

        self.retry_run(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if self.mapping.soft_delete_enabled {
                let mut tombstone = stored.clone();
                tombstone.set_version(stored.version() + 1);
                tombstone.set_is_deleted(true);
                tombstone.set_last_write_time(Utc::now());
                self.insert_row(&tx, &tombstone)?;
            } else {
                let table = self.dialect.escape_identifier(&self.mapping.table_name);
                let id_col = self.dialect.escape_identifier(self.id_column());
                tx.execute(&format!("DELETE FROM {table} WHERE {id_col} = ?1"), [id.to_string()])?;
            }
            if self.mapping.enable_audit_trail {
                self.record_audit(&tx, "delete", &id.to_string(), caller)?;
            }
            tx.commit()?;
            Ok(())
        })?;
        Ok(true)
    }

    /// Delete every entity in `ids`, idempotently. Returns the number of
    /// entities that actually existed prior to the call.
    ///
    /// # Errors
    ///
    /// Returns an error if any individual delete fails unexpectedly (not
    /// counting "already absent", which is not an error).
    pub fn delete_batch(&self, ids: &[E::Id], caller: &CallerContext) -> Result<u64> {
        let mut affected = 0u64;
        for id in ids {
            if self.get(id)?.is_some() {
                affected += 1;
            }
            self.delete(id, caller)?;
        }
        Ok(affected)
    }

    fn record_audit(
        &self,
        tx: &rusqlite::Transaction<'_>,
        operation: &str,
        key: &str,
        caller: &CallerContext,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO _audit_trail (entity_type, operation, entity_key, actor, at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![E::type_name(), operation, key, caller.actor, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Expose the underlying connection for operations that need direct SQL
    /// access (the bulk pipeline and purge engine in sibling modules), under
    /// the same retry/mutex discipline every CRUD operation uses.
    pub(crate) fn with_connection<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.retry_run(|conn| op(conn))
    }

    pub(crate) fn with_transaction<T>(
        &self,
        op: impl Fn(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.retry_run(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = op(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }
}

fn ensure_audit_table(conn: &Connection, mapping: &EntityMapping) -> Result<()> {
    let _ = mapping;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _audit_trail (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            operation TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            actor TEXT NOT NULL,
            at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_trail_entity ON _audit_trail(entity_type, entity_key);",
    )?;
    Ok(())
}

/// Convenience accessor for `DateTime<Utc>` construction in entity
/// `MappedEntity` impls outside this module.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlValue;
    use crate::mapping::{ColumnMapping, EntityMappingBuilder, MappingError, SqlType};

    #[derive(Debug, Clone)]
    struct Widget {
        id: String,
        name: String,
        version: i64,
        created_time: DateTime<Utc>,
        last_write_time: DateTime<Utc>,
    }

    impl MappedEntity for Widget {
        type Id = String;

        fn type_name() -> &'static str {
            "Widget"
        }

        fn build_mapping() -> std::result::Result<EntityMapping, MappingError> {
            EntityMappingBuilder::new("widgets")
                .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
                .column(ColumnMapping::new("Name", SqlType::Text).not_null())
                .column(ColumnMapping::new("Version", SqlType::Int64).not_null())
                .column(ColumnMapping::new("CreatedTime", SqlType::Temporal).not_null())
                .column(ColumnMapping::new("LastWriteTime", SqlType::Temporal).not_null())
                .build()
        }

        fn id(&self) -> Self::Id {
            self.id.clone()
        }

        fn column_values(&self) -> Vec<(&'static str, SqlValue)> {
            vec![
                ("Id", SqlValue::Text(self.id.clone())),
                ("Name", SqlValue::Text(self.name.clone())),
                ("Version", SqlValue::Int(self.version)),
                ("CreatedTime", SqlValue::Temporal(self.created_time)),
                ("LastWriteTime", SqlValue::Temporal(self.last_write_time)),
            ]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("Id")?,
                name: row.get("Name")?,
                version: row.get("Version")?,
                created_time: row.get::<_, String>("CreatedTime")?.parse().unwrap_or_else(|_| Utc::now()),
                last_write_time: row.get::<_, String>("LastWriteTime")?.parse().unwrap_or_else(|_| Utc::now()),
            })
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn created_time(&self) -> Option<DateTime<Utc>> {
            Some(self.created_time)
        }

        fn set_created_time(&mut self, time: DateTime<Utc>) {
            self.created_time = time;
        }

        fn last_write_time(&self) -> Option<DateTime<Utc>> {
            Some(self.last_write_time)
        }

        fn set_last_write_time(&mut self, time: DateTime<Utc>) {
            self.last_write_time = time;
        }
    }

    fn repo() -> Repository<Widget> {
        crate::mapping::clear_mapping_cache();
        Repository::<Widget>::open_in_memory(&EngineConfig::default()).expect("open repository")
    }

    fn new_widget(id: &str, name: &str) -> Widget {
        Widget {
            id: id.to_string(),
            name: name.to_string(),
            version: 0,
            created_time: Utc::now(),
            last_write_time: Utc::now(),
        }
    }

    #[test]
    fn create_then_get_round_trips_with_version_one() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        let created = repo.create(new_widget("a", "first"), &caller).unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.created_time, created.last_write_time);

        let fetched = repo.get(&"a".to_string()).unwrap().unwrap();
        assert_eq!(fetched.name, "first");
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn update_bumps_version_and_rejects_stale_version() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        let created = repo.create(new_widget("a", "first"), &caller).unwrap();

        let mut update_a = created.clone();
        update_a.name = "second".to_string();
        let updated = repo.update(update_a, &caller).unwrap();
        assert_eq!(updated.version, 2);

        let mut stale = created;
        stale.name = "conflicting".to_string();
        let err = repo.update(stale, &caller).unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict { expected: 1, actual: 2, .. }));

        let final_state = repo.get(&"a".to_string()).unwrap().unwrap();
        assert_eq!(final_state.name, "second");
    }

    #[test]
    fn delete_is_idempotent() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        repo.create(new_widget("a", "first"), &caller).unwrap();

        assert!(repo.delete(&"a".to_string(), &caller).unwrap());
        assert!(repo.delete(&"a".to_string(), &caller).unwrap());
        assert!(repo.get(&"a".to_string()).unwrap().is_none());
    }

    #[test]
    fn count_matches_query_length() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        repo.create(new_widget("a", "first"), &caller).unwrap();
        repo.create(new_widget("b", "second"), &caller).unwrap();

        let predicate = Predicate::All;
        let count = repo.count(&predicate, ReadOptions::default()).unwrap();
        let queried = repo.query(&predicate, &OrderBy::new(), None, ReadOptions::default()).unwrap();
        assert_eq!(count, queried.len() as u64);
        assert_eq!(count, 2);
    }
}
