//! # TimelineDB - Temporal Event-Sourced Ledger
//!
//! TimelineDB is the ledger kernel of a multi-tenant HR/payroll backend,
//! built on SQLite. It provides:
//!
//! - **Idempotent submission**: every event carries a caller key; repeats are
//!   safe no-ops, conflicting repeats are rejected
//! - **Out-of-band history edits**: corrections and rescinds reinterpret a
//!   past event without touching it
//! - **Replay-based versions**: each entity's validity timeline is recomputed
//!   from its logs on every mutation
//! - **Tenant isolation**: every call names its tenant and is rejected, not
//!   filtered, when it does not match
//!
//! The same kernel serves staffing assignments, org units, payroll runs,
//! holiday calendars and time profiles.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              LedgerHandle (async, spawn_blocking)               │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Ledger                                │
//! │   tenant check ─► per-entity lock ─► BEGIN IMMEDIATE            │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   writer    │  │   replay    │  │  reader (read-only,WAL) │  │
//! │  │ append rows │─►│ pure fold   │  │  as-of, timeline, audit │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   SQLite: events | corrections | rescinds | entity_heads |     │
//! │           versions (derived)                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Append-only logs**: events, corrections and rescinds are never
//!    updated or deleted
//! 2. **One event per day**: at most one event per (tenant, entity, date)
//! 3. **Contiguous versions**: an entity's versions never overlap and leave
//!    no gaps; only the last is open-ended
//! 4. **Deterministic replay**: identical logs give byte-identical versions
//! 5. **Atomic mutations**: a mutation whose replay fails leaves no row
//!
//! ## Module Organization
//!
//! - [`error`]: The error enum and `Result` alias
//! - [`types`]: Identifiers, payloads, commands, records, versions
//! - [`codec`]: Canonical JSON, date text, timeline digests
//! - [`schema`]: SQLite DDL and database initialization
//! - [`config`]: `LedgerConfig` and TOML loading
//! - [`tenant`]: Request context and the tenant check
//! - [`lock`]: Per-entity serialization lock
//! - [`rules`]: Per-kind attribute rules
//! - [`replay`]: The pure replay engine
//! - [`reader`]: All SQL queries
//! - [`writer`]: Submit, correct, rescind and rematerialization
//! - [`ledger`]: The synchronous `Ledger` and its tenant-bound view
//! - [`api`]: The async `LedgerHandle`

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;

pub mod types;

pub mod codec;

pub mod schema;

pub mod config;

pub mod tenant;

pub mod lock;

/// Attribute rules for each entity kind.
pub mod rules;

/// Deterministic reconstruction of version timelines.
pub mod replay;

pub mod reader;

pub mod writer;

pub mod ledger;

/// Async access to the ledger.
///
/// The main async entry point is [`LedgerHandle`](api::LedgerHandle).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::LedgerHandle;
pub use config::LedgerConfig;
pub use error::{Error, Result};
pub use ledger::{Ledger, TenantLedger};
pub use replay::{replay, Timeline};
pub use schema::Database;
pub use tenant::RequestContext;

pub use types::{
    AuditEntry, CorrectEvent, CorrectionId, CorrectionRecord, EntityId, EntityKind, EntityRef,
    EventId, EventRecord, EventType, GlobalPos, InitiatorId, Payload, RescindEvent, RescindId,
    RescindRecord, SubmissionId, SubmitEvent, TenantId, Version,
};
