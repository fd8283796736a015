//! # SQLite Schema for TimelineDB
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  events (append-only)     corrections (append-only)  rescinds (a-o)     │
//! │  ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐ │
//! │  │ global_pos (PK)  │     │ global_pos (PK)  │     │ global_pos (PK)  │ │
//! │  │ event_id (UQ)    │     │ correction_id UQ │     │ rescind_id (UQ)  │ │
//! │  │ tenant, entity,  │     │ tenant, entity,  │     │ tenant, entity,  │ │
//! │  │ effective_date UQ│     │ target_date (UQ) │     │ target_date (UQ) │ │
//! │  └──────────────────┘     └──────────────────┘     └──────────────────┘ │
//! │            │                       │                        │           │
//! │            └──────────── replay ───┴────────────────────────┘           │
//! │                              ▼                                          │
//! │  entity_heads                 versions (derived)                        │
//! │  ┌──────────────────┐         ┌──────────────────────────┐              │
//! │  │ tenant, entity PK│         │ tenant, entity, seq_no PK│              │
//! │  │ kind, owning_key │         │ attributes               │              │
//! │  │ timeline_digest  │         │ valid_from, valid_to     │              │
//! │  └──────────────────┘         └──────────────────────────┘              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### One position sequence for three logs
//!
//! Events, corrections and rescinds each carry a `global_pos` drawn from one
//! shared sequence (the next position is computed inside the writer's
//! immediate transaction). Replay uses it to order events that share a date
//! and audit history uses it to interleave the three logs.
//!
//! ### Append-only by trigger
//!
//! The three log tables reject `UPDATE` and `DELETE` with a trigger. The
//! ledger never issues either, and the triggers make out-of-band edits fail
//! loudly instead of silently rewriting history.
//!
//! ### Versions are a cache
//!
//! `versions` and the digest in `entity_heads` are derived from the logs and
//! are deleted and rewritten on every mutation of an entity. They can always
//! be regenerated by replay.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// There are no migrations: a database with a different version is refused.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `events` table: one row per accepted event.
///
/// # Columns
///
/// - `global_pos`: Position in the shared append order (PK)
/// - `event_id`: Caller idempotency key, unique across the whole ledger
/// - `entity_kind`, `event_type`: Stored as their lowercase/uppercase names
/// - `effective_date`: ISO date text
/// - `payload`: Canonical JSON, exactly as submitted (never rewritten)
/// - `recorded_ms`: Unix milliseconds at commit
///
/// # Uniqueness
///
/// - One event per (tenant, entity, effective_date)
/// - One event per (tenant, submission_id)
const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    global_pos     INTEGER PRIMARY KEY,
    event_id       TEXT NOT NULL UNIQUE,
    tenant_id      TEXT NOT NULL,
    entity_id      TEXT NOT NULL,
    entity_kind    TEXT NOT NULL,
    event_type     TEXT NOT NULL CHECK (event_type IN ('CREATE', 'UPDATE')),
    effective_date TEXT NOT NULL,
    payload        TEXT NOT NULL,
    submission_id  TEXT NOT NULL,
    initiator_id   TEXT NOT NULL,
    recorded_ms    INTEGER NOT NULL,
    UNIQUE (tenant_id, entity_id, effective_date),
    UNIQUE (tenant_id, submission_id)
)
"#;

/// The `corrections` table: replacement payloads for historical events.
///
/// At most one correction exists per targeted (tenant, entity, date).
const CREATE_CORRECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS corrections (
    global_pos          INTEGER PRIMARY KEY,
    correction_id       TEXT NOT NULL UNIQUE,
    tenant_id           TEXT NOT NULL,
    entity_id           TEXT NOT NULL,
    target_date         TEXT NOT NULL,
    replacement_payload TEXT NOT NULL,
    submission_id       TEXT NOT NULL,
    initiator_id        TEXT NOT NULL,
    recorded_ms         INTEGER NOT NULL,
    UNIQUE (tenant_id, entity_id, target_date),
    UNIQUE (tenant_id, submission_id)
)
"#;

/// The `rescinds` table: exclusions of historical events.
///
/// At most one rescind exists per targeted (tenant, entity, date). The
/// payload is audit metadata only.
const CREATE_RESCINDS: &str = r#"
CREATE TABLE IF NOT EXISTS rescinds (
    global_pos    INTEGER PRIMARY KEY,
    rescind_id    TEXT NOT NULL UNIQUE,
    tenant_id     TEXT NOT NULL,
    entity_id     TEXT NOT NULL,
    target_date   TEXT NOT NULL,
    payload       TEXT NOT NULL,
    submission_id TEXT NOT NULL,
    initiator_id  TEXT NOT NULL,
    recorded_ms   INTEGER NOT NULL,
    UNIQUE (tenant_id, entity_id, target_date),
    UNIQUE (tenant_id, submission_id)
)
"#;

/// Triggers that keep the three logs append-only.
const CREATE_APPEND_ONLY_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS events_no_update BEFORE UPDATE ON events
BEGIN SELECT RAISE(ABORT, 'events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS events_no_delete BEFORE DELETE ON events
BEGIN SELECT RAISE(ABORT, 'events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS corrections_no_update BEFORE UPDATE ON corrections
BEGIN SELECT RAISE(ABORT, 'corrections is append-only'); END;
CREATE TRIGGER IF NOT EXISTS corrections_no_delete BEFORE DELETE ON corrections
BEGIN SELECT RAISE(ABORT, 'corrections is append-only'); END;
CREATE TRIGGER IF NOT EXISTS rescinds_no_update BEFORE UPDATE ON rescinds
BEGIN SELECT RAISE(ABORT, 'rescinds is append-only'); END;
CREATE TRIGGER IF NOT EXISTS rescinds_no_delete BEFORE DELETE ON rescinds
BEGIN SELECT RAISE(ABORT, 'rescinds is append-only'); END;
"#;

/// The `entity_heads` table: identity registry plus replay summary.
///
/// # Columns
///
/// - `entity_kind`: Fixed by the CREATE event
/// - `owning_key`: Optional natural key; unique per (tenant, kind)
/// - `version_count`: Number of rows currently in `versions`
/// - `timeline_digest`: XXH3-64 of the materialized timeline (hex)
/// - `last_pos`: Highest global_pos that touched the entity
///
/// SQLite treats NULLs as distinct in unique indexes, so entities without
/// an owning key never collide with each other.
const CREATE_ENTITY_HEADS: &str = r#"
CREATE TABLE IF NOT EXISTS entity_heads (
    tenant_id       TEXT NOT NULL,
    entity_id       TEXT NOT NULL,
    entity_kind     TEXT NOT NULL,
    owning_key      TEXT,
    version_count   INTEGER NOT NULL,
    timeline_digest TEXT NOT NULL,
    last_pos        INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, entity_id)
)
"#;

const CREATE_ENTITY_HEADS_OWNING_KEY_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS entity_heads_owning_key
ON entity_heads(tenant_id, entity_kind, owning_key)
"#;

/// The `versions` table: the materialized timeline read by as-of queries.
///
/// `valid_to` is NULL for the open-ended last version.
const CREATE_VERSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS versions (
    tenant_id  TEXT NOT NULL,
    entity_id  TEXT NOT NULL,
    seq_no     INTEGER NOT NULL,
    attributes TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to   TEXT,
    PRIMARY KEY (tenant_id, entity_id, seq_no)
)
"#;

/// Supports `WHERE tenant_id = ? AND entity_id = ? AND valid_from <= ?`.
const CREATE_VERSIONS_AS_OF_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS versions_as_of
ON versions(tenant_id, entity_id, valid_from)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS timelinedb_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the TimelineDB schema applied.
///
/// `Database` owns its `Connection`; dropping it closes the connection.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::time::Duration;
    /// use timelinedb::Database;
    ///
    /// let db = Database::open("ledger.db", Duration::from_secs(5))?;
    /// # Ok::<(), timelinedb::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// In-memory databases are lost when the connection closes and cannot be
    /// shared with a second connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Opens a read-only connection to an already initialized database file.
    ///
    /// Used for the ledger's reader connection. Under WAL, readers see the
    /// last committed state and never block the writer.
    pub fn open_read_only(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA query_only = ON")?;
        let db = Self { conn };
        db.check_version()?;
        Ok(db)
    }

    /// Consumes the wrapper and returns the connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn initialize(&mut self) -> Result<()> {
        // WAL: readers see a consistent snapshot while the writer commits.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_EVENTS)?;
        self.conn.execute_batch(CREATE_CORRECTIONS)?;
        self.conn.execute_batch(CREATE_RESCINDS)?;
        self.conn.execute_batch(CREATE_APPEND_ONLY_TRIGGERS)?;
        self.conn.execute_batch(CREATE_ENTITY_HEADS)?;
        self.conn.execute_batch(CREATE_ENTITY_HEADS_OWNING_KEY_INDEX)?;
        self.conn.execute_batch(CREATE_VERSIONS)?;
        self.conn.execute_batch(CREATE_VERSIONS_AS_OF_INDEX)?;

        self.verify_or_set_version()
    }

    fn stored_version(&self) -> Result<Option<i32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM timelinedb_metadata WHERE key = 'schema_version'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => {
                let text: String = row.get(0)?;
                text.parse()
                    .map(Some)
                    .map_err(|_| Error::Schema(format!("unreadable schema version '{text}'")))
            }
        }
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        match self.stored_version()? {
            None => {
                self.conn.execute(
                    "INSERT INTO timelinedb_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
                Ok(())
            }
            Some(_) => self.check_version(),
        }
    }

    fn check_version(&self) -> Result<()> {
        match self.stored_version()? {
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            Some(v) => Err(Error::Schema(format!(
                "schema version mismatch: database has version {v}, but this TimelineDB version requires {SCHEMA_VERSION}"
            ))),
            None => Err(Error::Schema("database has no schema version".to_string())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
