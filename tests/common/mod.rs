//! Shared soft-delete-enabled entity used across integration tests.

use chrono::{DateTime, Utc};
use persist_lite::dialect::SqlValue;
use persist_lite::mapping::{
    ColumnMapping, EntityMapping, EntityMappingBuilder, MappedEntity, MappingError, SqlType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub body: String,
    pub version: i64,
    pub created_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Note {
    pub fn new(id: &str, body: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            body: body.to_string(),
            version: 0,
            created_time: now,
            last_write_time: now,
            is_deleted: false,
        }
    }
}

impl MappedEntity for Note {
    type Id = String;

    fn type_name() -> &'static str {
        "Note"
    }

    fn build_mapping() -> Result<EntityMapping, MappingError> {
        EntityMappingBuilder::new("notes")
            .soft_delete(true)
            .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("Version", SqlType::Int64).primary_key(1).not_null())
            .column(ColumnMapping::new("Body", SqlType::Text).not_null())
            .column(ColumnMapping::new("CreatedTime", SqlType::Temporal).not_null())
            .column(ColumnMapping::new("LastWriteTime", SqlType::Temporal).not_null())
            .column(ColumnMapping::new("IsDeleted", SqlType::Bool).not_null())
            .build()
    }

    fn id(&self) -> Self::Id {
        self.id.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, SqlValue)> {
        vec![
            ("Id", SqlValue::Text(self.id.clone())),
            ("Version", SqlValue::Int(self.version)),
            ("Body", SqlValue::Text(self.body.clone())),
            ("CreatedTime", SqlValue::Temporal(self.created_time)),
            ("LastWriteTime", SqlValue::Temporal(self.last_write_time)),
            ("IsDeleted", SqlValue::Bool(self.is_deleted)),
        ]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("Id")?,
            version: row.get("Version")?,
            body: row.get("Body")?,
            created_time: row.get::<_, String>("CreatedTime")?.parse().unwrap_or_else(|_| Utc::now()),
            last_write_time: row.get::<_, String>("LastWriteTime")?.parse().unwrap_or_else(|_| Utc::now()),
            is_deleted: row.get("IsDeleted")?,
        })
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn set_is_deleted(&mut self, deleted: bool) {
        self.is_deleted = deleted;
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
