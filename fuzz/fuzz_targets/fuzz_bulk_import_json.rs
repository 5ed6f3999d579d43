//! Feeds arbitrary bytes as a JSON import file into the bulk pipeline
//! against an in-memory repository. The goal is robustness: malformed or
//! adversarial JSON must surface as an `EngineError`, never panic the
//! importer or leave the repository in a torn state.

#![no_main]

use std::io::Write;

use chrono::{DateTime, Utc};
use libfuzzer_sys::fuzz_target;
use persist_lite::bulk::{self, FileFormat, ImportOptions};
use persist_lite::config::EngineConfig;
use persist_lite::dialect::SqlValue;
use persist_lite::mapping::{ColumnMapping, EntityMapping, EntityMappingBuilder, MappingError};
use persist_lite::repository::{CallerContext, Repository};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FuzzRecord {
    id: String,
    payload: String,
    version: i64,
    #[serde(default = "Utc::now")]
    created_time: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    last_write_time: DateTime<Utc>,
}

impl persist_lite::mapping::MappedEntity for FuzzRecord {
    type Id = String;

    fn type_name() -> &'static str {
        "FuzzRecord"
    }

    fn build_mapping() -> Result<EntityMapping, MappingError> {
        EntityMappingBuilder::new("fuzz_records")
            .column(ColumnMapping::new("Id", persist_lite::mapping::SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("Payload", persist_lite::mapping::SqlType::Text).not_null())
            .column(ColumnMapping::new("Version", persist_lite::mapping::SqlType::Int64).not_null())
            .column(ColumnMapping::new("CreatedTime", persist_lite::mapping::SqlType::Temporal).not_null())
            .column(ColumnMapping::new("LastWriteTime", persist_lite::mapping::SqlType::Temporal).not_null())
            .build()
    }

    fn id(&self) -> Self::Id {
        self.id.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("Id", SqlValue::Text(self.id.clone())),
            ("Payload", SqlValue::Text(self.payload.clone())),
            ("Version", SqlValue::Int(self.version)),
            ("CreatedTime", SqlValue::Temporal(self.created_time)),
            ("LastWriteTime", SqlValue::Temporal(self.last_write_time)),
        ]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("Id")?,
            payload: row.get("Payload")?,
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

fuzz_target!(|data: &[u8]| {
    persist_lite::mapping::clear_mapping_cache();
    let Ok(repository) = Repository::<FuzzRecord>::open_in_memory(&EngineConfig::default()) else {
        return;
    };

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();

    let mut options = ImportOptions::default();
    options.format = FileFormat::Json;
    let caller = CallerContext::new("fuzz");

    let _ = bulk::bulk_import(&repository, file.path(), options, &caller);
});
