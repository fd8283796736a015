//! # Async Handle for TimelineDB
//!
//! [`Ledger`] is synchronous: every call runs a SQLite transaction on the
//! calling thread. [`LedgerHandle`] wraps it for Tokio callers by moving each
//! call onto the blocking pool with `spawn_blocking`, so a slow mutation or
//! a lock wait never stalls the async executor.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │       Async Tasks            │
//! │  task1  task2  task3  ...    │
//! └──────┬──────┬──────┬─────────┘
//!        │ spawn_blocking
//!        ▼      ▼      ▼
//! ┌──────────────────────────────┐
//! │  Blocking pool threads       │
//! │  Arc<Ledger>                 │
//! │   ├ KeyLocks (per entity)    │
//! │   ├ writer: Mutex<Connection>│
//! │   └ reader: Mutex<Connection>│
//! └──────────────┬───────────────┘
//!                ▼
//!          SQLite (WAL)
//! ```
//!
//! The handle is `Clone`; all clones share the same ledger.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::tenant::RequestContext;
use crate::types::{
    AuditEntry, CorrectEvent, CorrectionRecord, EntityId, EventRecord, RescindEvent,
    RescindRecord, SubmitEvent, TenantId, Version,
};

/// Async, cloneable access to a [`Ledger`].
///
/// # Example
///
/// ```rust,no_run
/// use timelinedb::{EntityKind, EntityRef, LedgerConfig, LedgerHandle, Payload, RequestContext, SubmitEvent};
///
/// #[tokio::main]
/// async fn main() -> timelinedb::Result<()> {
///     let ledger = LedgerHandle::open("ledger.db", LedgerConfig::default()).await?;
///     let ctx = RequestContext::for_tenant("acme");
///
///     let cmd = SubmitEvent::create(
///         "evt-1",
///         "acme",
///         EntityRef::new("asg-1", EntityKind::Assignment),
///         chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
///         Payload::parse(r#"{"position_id": "p-7", "status": "active"}"#)?,
///     );
///     let record = ledger.submit(ctx, cmd).await?;
///     println!("stored at position {}", record.global_pos);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    ledger: Arc<Ledger>,
}

impl LedgerHandle {
    /// Opens a file-backed ledger on the blocking pool.
    pub async fn open(path: impl AsRef<Path>, config: LedgerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = tokio::task::spawn_blocking(move || Ledger::open(path, config))
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))??;
        Ok(Self::new(ledger))
    }

    /// Creates an in-memory ledger.
    pub fn open_in_memory(config: LedgerConfig) -> Result<Self> {
        Ledger::open_in_memory(config).map(Self::new)
    }

    /// Wraps an already opened ledger.
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger: Arc::new(ledger),
        }
    }

    /// The shared synchronous ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Ledger) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))?
    }

    /// See [`Ledger::submit`].
    pub async fn submit(&self, ctx: RequestContext, cmd: SubmitEvent) -> Result<EventRecord> {
        self.run(move |ledger| ledger.submit(&ctx, cmd)).await
    }

    /// See [`Ledger::correct`].
    pub async fn correct(&self, ctx: RequestContext, cmd: CorrectEvent) -> Result<CorrectionRecord> {
        self.run(move |ledger| ledger.correct(&ctx, cmd)).await
    }

    /// See [`Ledger::rescind`].
    pub async fn rescind(&self, ctx: RequestContext, cmd: RescindEvent) -> Result<RescindRecord> {
        self.run(move |ledger| ledger.rescind(&ctx, cmd)).await
    }

    /// See [`Ledger::read_version_as_of`].
    pub async fn read_version_as_of(
        &self,
        ctx: RequestContext,
        tenant_id: TenantId,
        entity_id: EntityId,
        as_of: NaiveDate,
    ) -> Result<Version> {
        self.run(move |ledger| ledger.read_version_as_of(&ctx, &tenant_id, &entity_id, as_of))
            .await
    }

    /// See [`Ledger::read_timeline`].
    pub async fn read_timeline(
        &self,
        ctx: RequestContext,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<Version>> {
        self.run(move |ledger| ledger.read_timeline(&ctx, &tenant_id, &entity_id))
            .await
    }

    /// See [`Ledger::audit_history`].
    pub async fn audit_history(
        &self,
        ctx: RequestContext,
        tenant_id: TenantId,
        entity_id: EntityId,
        limit: Option<u32>,
    ) -> Result<Vec<AuditEntry>> {
        self.run(move |ledger| ledger.audit_history(&ctx, &tenant_id, &entity_id, limit))
            .await
    }

    /// See [`Ledger::rebuild_versions`].
    pub async fn rebuild_versions(
        &self,
        ctx: RequestContext,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<Version>> {
        self.run(move |ledger| ledger.rebuild_versions(&ctx, &tenant_id, &entity_id))
            .await
    }

    /// See [`Ledger::verify_versions`].
    pub async fn verify_versions(
        &self,
        ctx: RequestContext,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<bool> {
        self.run(move |ledger| ledger.verify_versions(&ctx, &tenant_id, &entity_id))
            .await
    }
}
