//! Age-bounded purge engine: preview/commit deletion over a predicate, with
//! optional pre-purge backup (via [`crate::bulk`]) and optional storage
//! compaction, generalized from retention-day tombstone bookkeeping into an
//! arbitrary-predicate cleanup pass.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bulk::{self, ExportMode, ExportOptions, ExportOutput};
use crate::dialect::SqlDialect;
use crate::error::{EngineError, Result, ValidationError};
use crate::expr::{OrderBy, Predicate};
use crate::mapping::MappedEntity;
use crate::repository::{ReadOptions, Repository};

/// Which rows a purge pass considers, layered on top of the caller's
/// predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStrategy {
    /// Only historical (non-live) soft-delete rows; the current live version
    /// of every logical entity is preserved regardless of age.
    PreserveActiveVersions,
    /// Only rows already past their `AbsoluteExpiration`.
    PurgeExpired,
    /// Every row matching the predicate and age bound, live or not.
    PurgeAll,
}

/// Options controlling one [`purge`] call.
pub struct PurgeOptions {
    /// When `true` (the default), only count and sample matching rows; never
    /// mutates the store.
    pub safe_mode: bool,
    pub strategy: PurgeStrategy,
    /// `now - age_threshold` as the cutoff against `CreatedTime`. Exactly one
    /// of `age_threshold`/`cutoff_date` must be set.
    pub age_threshold: Option<Duration>,
    /// An absolute cutoff against `CreatedTime`. Exactly one of
    /// `age_threshold`/`cutoff_date` must be set.
    pub cutoff_date: Option<DateTime<Utc>>,
    pub max_preview_samples: usize,
    pub backup_before_purge: bool,
    pub backup_path: Option<PathBuf>,
    pub optimize_storage: bool,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            safe_mode: true,
            strategy: PurgeStrategy::PreserveActiveVersions,
            age_threshold: None,
            cutoff_date: None,
            max_preview_samples: 10,
            backup_before_purge: false,
            backup_path: None,
            optimize_storage: false,
        }
    }
}

impl PurgeOptions {
    /// Resolve the configured age bound to a single absolute cutoff.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] unless exactly one of `age_threshold`/
    /// `cutoff_date` is set.
    pub fn cutoff(&self) -> std::result::Result<DateTime<Utc>, ValidationError> {
        match (self.age_threshold, self.cutoff_date) {
            (Some(age), None) => {
                let span = chrono::Duration::from_std(age).map_err(|err| ValidationError {
                    field: "age_threshold".to_string(),
                    message: err.to_string(),
                })?;
                Ok(Utc::now() - span)
            }
            (None, Some(cutoff)) => Ok(cutoff),
            (None, None) => Err(ValidationError {
                field: "age_threshold/cutoff_date".to_string(),
                message: "exactly one of age_threshold or cutoff_date must be set".to_string(),
            }),
            (Some(_), Some(_)) => Err(ValidationError {
                field: "age_threshold/cutoff_date".to_string(),
                message: "age_threshold and cutoff_date are mutually exclusive".to_string(),
            }),
        }
    }
}

/// A preview of what a purge would delete, without deleting anything.
#[derive(Debug, Clone)]
pub struct PurgePreview {
    pub affected_entity_count: u64,
    pub sample_entities: Vec<serde_json::Value>,
}

/// The outcome of one [`purge`] call.
#[derive(Debug, Clone)]
pub struct PurgeResult {
    pub is_preview: bool,
    pub preview: Option<PurgePreview>,
    pub entities_purged: u64,
    pub space_reclaimed_bytes: i64,
}

/// Build the predicate a purge strategy narrows the caller's `predicate` to:
/// the age bound against `CreatedTime`, plus whatever row-visibility
/// restriction the strategy implies.
fn strategy_predicate(
    predicate: Predicate,
    strategy: PurgeStrategy,
    cutoff: DateTime<Utc>,
) -> (Predicate, ReadOptions) {
    let aged = predicate.and(Predicate::Lt(
        "CreatedTime".to_string(),
        crate::dialect::SqlValue::Temporal(cutoff),
    ));
    match strategy {
        // The live version of every entity (the highest Version per key) is
        // preserved by never including all-version history in the read, so
        // a plain `query` only ever sees each key's own live row; flipping
        // that around to "historical only" requires the full version chain
        // so the engine can subtract the live row per key.
        PurgeStrategy::PreserveActiveVersions => (
            aged,
            ReadOptions { include_all_versions: true, include_deleted: true, include_expired: true },
        ),
        PurgeStrategy::PurgeExpired => (
            aged.and(Predicate::LtEq(
                "AbsoluteExpiration".to_string(),
                crate::dialect::SqlValue::Temporal(Utc::now()),
            )),
            ReadOptions { include_all_versions: true, include_deleted: true, include_expired: true },
        ),
        PurgeStrategy::PurgeAll => (
            aged,
            ReadOptions { include_all_versions: true, include_deleted: true, include_expired: true },
        ),
    }
}

/// Narrow a full version-history result set down to the rows a
/// [`PurgeStrategy::PreserveActiveVersions`] pass is allowed to delete: every
/// row except each logical key's current live version (highest `Version`).
fn exclude_live_versions<E: MappedEntity>(rows: Vec<E>) -> Vec<E> {
    use std::collections::HashMap;
    let mut live: HashMap<String, i64> = HashMap::new();
    for row in &rows {
        let key = row.id().to_string();
        let entry = live.entry(key).or_insert(row.version());
        if row.version() > *entry {
            *entry = row.version();
        }
    }
    rows.into_iter()
        .filter(|row| live.get(&row.id().to_string()).is_some_and(|v| *v != row.version()))
        .collect()
}

fn candidate_rows<E: MappedEntity + Serialize>(
    repository: &Repository<E>,
    predicate: &Predicate,
    strategy: PurgeStrategy,
    cutoff: DateTime<Utc>,
) -> Result<Vec<E>> {
    let (scoped, read_options) = strategy_predicate(predicate.clone(), strategy, cutoff);
    let order = OrderBy::new().then_by(repository.id_column().to_string(), crate::expr::SortDirection::Ascending);
    let rows = repository.query(&scoped, &order, None, read_options)?;
    Ok(if matches!(strategy, PurgeStrategy::PreserveActiveVersions) {
        exclude_live_versions(rows)
    } else {
        rows
    })
}

fn file_size(path: Option<&std::path::Path>) -> i64 {
    path.and_then(|p| std::fs::metadata(p).ok()).map_or(0, |m| m.len() as i64)
}

/// Run one purge pass over `repository`, scoped by `predicate` and `options`.
///
/// In `safe_mode` (the default), this only counts and samples matching rows
/// and never mutates the store — preview enumeration is the only thing that
/// can fail. Outside safe mode, matching rows are deleted inside a single
/// transaction; when `optimize_storage` is set, [`crate::dialect::SqlDialect::
/// compaction_command`] runs afterward (outside any transaction, since
/// SQLite's `VACUUM` forbids one) and the reclaimed space is reported from
/// the on-disk file-size delta.
///
/// # Errors
///
/// Returns [`ValidationError`] if neither or both of `age_threshold`/
/// `cutoff_date` are set, or an error if the query, backup export, delete,
/// or compaction fails.
pub fn purge<E: MappedEntity + Serialize>(
    repository: &Repository<E>,
    predicate: Predicate,
    options: PurgeOptions,
) -> Result<PurgeResult> {
    let cutoff = options.cutoff()?;
    let candidates = candidate_rows(repository, &predicate, options.strategy, cutoff)?;

    if options.safe_mode {
        let sample_entities = candidates
            .iter()
            .take(options.max_preview_samples)
            .map(|e| serde_json::to_value(e).unwrap_or(serde_json::Value::Null))
            .collect();
        return Ok(PurgeResult {
            is_preview: true,
            preview: Some(PurgePreview {
                affected_entity_count: candidates.len() as u64,
                sample_entities,
            }),
            entities_purged: 0,
            space_reclaimed_bytes: 0,
        });
    }

    if options.backup_before_purge {
        let backup_path = options.backup_path.clone().ok_or_else(|| {
            EngineError::ArgumentInvalid("backup_before_purge requires backup_path".to_string())
        })?;
        let export_options = ExportOptions {
            predicate: Some(predicate.clone()),
            mode: ExportMode::Full,
            export_folder: Some(backup_path),
            file_name_prefix: "purge-backup".to_string(),
            include_deleted: true,
            include_all_versions: true,
            include_expired: true,
            ..ExportOptions::default()
        };
        let _: ExportOutput<E> = bulk::bulk_export(repository, export_options)?;
    }

    let size_before = if options.optimize_storage { file_size(repository.db_path()) } else { 0 };

    let ids: Vec<E::Id> = candidates.iter().map(MappedEntity::id).collect();
    let table = repository.mapping().table_name.clone();
    let id_column = repository.id_column().to_string();
    let version_column = repository.mapping().audit_fields.version.clone();

    let purged = repository.with_transaction(|tx| {
        let escaped_table = repository.dialect().escape_identifier(&table);
        let escaped_id = repository.dialect().escape_identifier(&id_column);
        let mut affected = 0u64;
        for (index, id) in ids.iter().enumerate() {
            // Always scope by (id, version) when the table carries a version
            // column: a row sharing an id but outside the candidate set (a
            // live row newer than the cutoff, for instance) must survive.
            let sql = if let Some(version_col) = version_column.as_deref() {
                let escaped_version = repository.dialect().escape_identifier(version_col);
                format!("DELETE FROM {escaped_table} WHERE {escaped_id} = ?1 AND {escaped_version} = ?2")
            } else {
                format!("DELETE FROM {escaped_table} WHERE {escaped_id} = ?1")
            };
            let rows = if sql.contains("?2") {
                tx.execute(&sql, rusqlite::params![id.to_string(), candidates[index].version()])?
            } else {
                tx.execute(&sql, rusqlite::params![id.to_string()])?
            };
            affected += rows as u64;
        }
        Ok(affected)
    })?;

    let mut space_reclaimed_bytes = 0i64;
    if options.optimize_storage {
        repository.with_connection(|conn| {
            conn.execute_batch(repository.dialect().compaction_command())?;
            Ok(())
        })?;
        let size_after = file_size(repository.db_path());
        space_reclaimed_bytes = (size_before - size_after).max(0);
    }

    Ok(PurgeResult { is_preview: false, preview: None, entities_purged: purged, space_reclaimed_bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dialect::SqlValue;
    use crate::mapping::{ColumnMapping, EntityMappingBuilder, MappingError, SqlType};
    use crate::repository::CallerContext;
    use chrono::Duration as ChronoDuration;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Record {
        id: String,
        created_time: DateTime<Utc>,
        last_write_time: DateTime<Utc>,
        version: i64,
    }

    impl MappedEntity for Record {
        type Id = String;

        fn type_name() -> &'static str {
            "PurgeRecord"
        }

        fn build_mapping() -> std::result::Result<crate::mapping::EntityMapping, MappingError> {
            EntityMappingBuilder::new("purge_records")
                .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
                .column(ColumnMapping::new("CreatedTime", SqlType::Temporal).not_null())
                .column(ColumnMapping::new("LastWriteTime", SqlType::Temporal).not_null())
                .column(ColumnMapping::new("Version", SqlType::Int64).not_null())
                .build()
        }

        fn id(&self) -> Self::Id {
            self.id.clone()
        }

        fn column_values(&self) -> Vec<(&'static str, SqlValue)> {
            vec![
                ("Id", SqlValue::Text(self.id.clone())),
                ("CreatedTime", SqlValue::Temporal(self.created_time)),
                ("LastWriteTime", SqlValue::Temporal(self.last_write_time)),
                ("Version", SqlValue::Int(self.version)),
            ]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("Id")?,
                created_time: row.get::<_, String>("CreatedTime")?.parse().unwrap_or_else(|_| Utc::now()),
                last_write_time: row.get::<_, String>("LastWriteTime")?.parse().unwrap_or_else(|_| Utc::now()),
                version: row.get("Version")?,
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

    fn repo() -> Repository<Record> {
        crate::mapping::clear_mapping_cache();
        Repository::<Record>::open_in_memory(&EngineConfig::default()).expect("open repository")
    }

    #[test]
    fn safe_mode_counts_without_deleting() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        let now = Utc::now();
        for i in 0..8 {
            let old = i < 5;
            let created = if old { now - ChronoDuration::days(120) } else { now };
            repo.create(
                Record { id: format!("r{i}"), created_time: created, last_write_time: created, version: 0 },
                &caller,
            )
            .unwrap();
        }

        let options = PurgeOptions {
            safe_mode: true,
            strategy: PurgeStrategy::PurgeAll,
            age_threshold: Some(Duration::from_secs(90 * 24 * 3600)),
            ..PurgeOptions::default()
        };
        let result = purge(&repo, Predicate::All, options).unwrap();
        assert!(result.is_preview);
        assert_eq!(result.preview.unwrap().affected_entity_count, 5);
        assert_eq!(result.entities_purged, 0);
        assert_eq!(repo.count(&Predicate::All, ReadOptions::default()).unwrap(), 8);
    }

    #[test]
    fn commit_mode_deletes_matching_rows() {
        let repo = repo();
        let caller = CallerContext::new("tester");
        let now = Utc::now();
        for i in 0..8 {
            let old = i < 5;
            let created = if old { now - ChronoDuration::days(120) } else { now };
            repo.create(
                Record { id: format!("r{i}"), created_time: created, last_write_time: created, version: 0 },
                &caller,
            )
            .unwrap();
        }

        let options = PurgeOptions {
            safe_mode: false,
            strategy: PurgeStrategy::PurgeAll,
            age_threshold: Some(Duration::from_secs(90 * 24 * 3600)),
            ..PurgeOptions::default()
        };
        let result = purge(&repo, Predicate::All, options).unwrap();
        assert_eq!(result.entities_purged, 5);
        assert_eq!(repo.count(&Predicate::All, ReadOptions::default()).unwrap(), 3);
    }

    #[test]
    fn requires_exactly_one_age_selector() {
        let repo = repo();
        let err = purge(&repo, Predicate::All, PurgeOptions { safe_mode: true, ..PurgeOptions::default() })
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
