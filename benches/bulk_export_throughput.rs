//! Throughput of the bulk export pipeline across row counts and output
//! shapes (in-memory vs. chunked files on disk, plain vs. gzip-compressed).

use chrono::{DateTime, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use persist_lite::bulk::{self, ExportOptions, ExportOutput};
use persist_lite::config::EngineConfig;
use persist_lite::dialect::SqlValue;
use persist_lite::mapping::{ColumnMapping, EntityMapping, EntityMappingBuilder, MappedEntity, MappingError, SqlType};
use persist_lite::repository::{CallerContext, Repository};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct Event {
    id: String,
    payload: String,
    version: i64,
    created_time: DateTime<Utc>,
    last_write_time: DateTime<Utc>,
}

impl MappedEntity for Event {
    type Id = String;

    fn type_name() -> &'static str {
        "Event"
    }

    fn build_mapping() -> Result<EntityMapping, MappingError> {
        EntityMappingBuilder::new("events")
            .column(ColumnMapping::new("Id", SqlType::Text).primary_key(0).not_null())
            .column(ColumnMapping::new("Payload", SqlType::Text).not_null())
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

fn seeded_repository(rows: u64) -> Repository<Event> {
    persist_lite::mapping::clear_mapping_cache();
    let repository = Repository::<Event>::open_in_memory(&EngineConfig::default()).expect("open repository");
    let caller = CallerContext::new("bench");
    for index in 0..rows {
        let now = Utc::now();
        repository
            .create(
                Event {
                    id: format!("event-{index}"),
                    payload: "x".repeat(128),
                    version: 0,
                    created_time: now,
                    last_write_time: now,
                },
                &caller,
            )
            .expect("seed row");
    }
    repository
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_export_in_memory");
    for &rows in &[100u64, 1_000, 10_000] {
        let repository = seeded_repository(rows);
        group.throughput(Throughput::Elements(rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let output = bulk::bulk_export(&repository, ExportOptions::default()).expect("export");
                match output {
                    ExportOutput::InMemory(entities) => assert_eq!(entities.len() as u64, rows),
                    ExportOutput::Files(_) => unreachable!("in-memory export should not write files"),
                }
            });
        });
    }
    group.finish();
}

fn bench_export_to_gzip_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_export_gzip_chunks");
    for &rows in &[1_000u64, 10_000] {
        let repository = seeded_repository(rows);
        group.throughput(Throughput::Elements(rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let dir = tempfile::tempdir().expect("tempdir");
                let options = ExportOptions {
                    export_folder: Some(dir.path().to_path_buf()),
                    batch_size: 500,
                    compress: true,
                    ..ExportOptions::default()
                };
                let output = bulk::bulk_export(&repository, options).expect("export");
                match output {
                    ExportOutput::Files(report) => assert_eq!(report.total_count, rows),
                    ExportOutput::InMemory(_) => unreachable!("file export should not stay in memory"),
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_export, bench_export_to_gzip_chunks);
criterion_main!(benches);
