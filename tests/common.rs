#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use timelinedb::{
    Database, EntityKind, EntityRef, Ledger, LedgerConfig, Payload, RequestContext, SubmitEvent,
};

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path, Duration::from_secs(5)).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("open read-write connection")
}

pub fn open_ledger(path: &Path) -> Ledger {
    Ledger::open(path, LedgerConfig::default()).expect("open ledger")
}

pub fn memory_ledger() -> Ledger {
    Ledger::open_in_memory(LedgerConfig::default()).expect("open in-memory ledger")
}

pub fn ctx(tenant: &str) -> RequestContext {
    RequestContext::for_tenant(tenant).with_initiator("hr-admin")
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
}

pub fn payload(value: Value) -> Payload {
    Payload::from_value(value).expect("object payload")
}

pub fn assignment(entity_id: &str) -> EntityRef {
    EntityRef::new(entity_id, EntityKind::Assignment)
}

pub fn create_assignment(event_id: &str, tenant: &str, entity_id: &str, on: &str, body: Value) -> SubmitEvent {
    SubmitEvent::create(event_id, tenant, assignment(entity_id), date(on), payload(body))
}

pub fn update_assignment(event_id: &str, tenant: &str, entity_id: &str, on: &str, body: Value) -> SubmitEvent {
    SubmitEvent::update(event_id, tenant, assignment(entity_id), date(on), payload(body))
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}
