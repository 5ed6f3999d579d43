//! A small concrete entity the CLI's bulk/purge subcommands operate on.
//!
//! `purge`/`export`/`import` are generic over [`crate::mapping::MappedEntity`]
//! at compile time, so exercising them from a single runtime binary needs one
//! fixed entity to dispatch against. `Record` plays that role: an
//! administrative binary built around one concrete schema rather than an
//! arbitrary user-chosen type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialect::SqlValue;
use crate::mapping::{ColumnMapping, EntityMapping, EntityMappingBuilder, MappedEntity, MappingError, SqlType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub data: String,
    pub version: i64,
    pub created_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
}

impl MappedEntity for Record {
    type Id = String;

    fn type_name() -> &'static str {
        "Record"
    }

    fn build_mapping() -> Result<EntityMapping, MappingError> {
        EntityMappingBuilder::new("records")
            .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("Data", SqlType::Text).not_null())
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
            ("Data", SqlValue::Text(self.data.clone())),
            ("Version", SqlValue::Int(self.version)),
            ("CreatedTime", SqlValue::Temporal(self.created_time)),
            ("LastWriteTime", SqlValue::Temporal(self.last_write_time)),
        ]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("Id")?,
            data: row.get("Data")?,
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
