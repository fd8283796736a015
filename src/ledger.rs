//! # The Ledger
//!
//! [`Ledger`] is the synchronous entry point. It owns one writer connection,
//! an optional read-only connection, the per-entity lock table and the
//! configuration.
//!
//! ## Request Path
//!
//! ```text
//! submit/correct/rescind(ctx, cmd)
//!   ├─ ctx.authorize(cmd.tenant)         TenantContextMissing / TenantMismatch
//!   ├─ locks.acquire(tenant, entity)     LockTimeout
//!   ├─ writer.lock() + BEGIN IMMEDIATE
//!   ├─ writer::submit_event / ...        append + replay + rewrite versions
//!   └─ COMMIT (Ok) or ROLLBACK (drop)
//!
//! read_version_as_of / read_timeline / audit_history(ctx, tenant, entity)
//!   ├─ ctx.authorize(tenant)
//!   └─ reader connection (file) or writer connection (in-memory)
//! ```
//!
//! ## Connections
//!
//! All mutations share one writer connection behind a mutex. The per-entity
//! lock orders mutations of the same entity; the writer mutex then runs
//! mutations of different entities one at a time, matching SQLite's single
//! writer.
//!
//! A file-backed ledger opens a second, read-only connection. Under WAL it
//! sees the last committed state, so reads observe a timeline either
//! entirely before or entirely after a mutation and never wait for one. An
//! in-memory database cannot be shared between connections, so in-memory
//! ledgers serve reads from the writer connection.
//!
//! ## Tenant-bound views
//!
//! [`Ledger::scoped`] returns a [`TenantLedger`] whose methods take no
//! tenant argument: the tenant comes from the context that built it.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::codec::{current_time_ms, timeline_digest};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::lock::{KeyLocks, LockKey};
use crate::reader;
use crate::schema::Database;
use crate::tenant::RequestContext;
use crate::types::{
    AuditEntry, CorrectEvent, CorrectionRecord, EntityId, EventRecord, RescindEvent,
    RescindRecord, SubmitEvent, TenantId, Version,
};
use crate::writer::{self, Outcome};

/// The temporal ledger.
///
/// `Ledger` is `Send + Sync`; share it behind an `Arc` (or use
/// [`crate::LedgerHandle`] from async code).
#[derive(Debug)]
pub struct Ledger {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    locks: KeyLocks,
    config: LedgerConfig,
}

impl Ledger {
    /// Opens (or creates) a file-backed ledger.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `config` fails validation
    /// - `Error::Sqlite` / `Error::Schema` if the database can't be opened
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use timelinedb::{Ledger, LedgerConfig};
    ///
    /// let ledger = Ledger::open("ledger.db", LedgerConfig::default())?;
    /// # Ok::<(), timelinedb::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let writer = Database::open(path, config.busy_timeout())?.into_connection();
        let reader = Database::open_read_only(path, config.busy_timeout())?.into_connection();
        info!(path = %path.display(), "opened ledger");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            locks: KeyLocks::new(),
            config,
        })
    }

    /// Creates an in-memory ledger (tests, tooling).
    pub fn open_in_memory(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let writer = Database::open_in_memory()?.into_connection();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: None,
            locks: KeyLocks::new(),
            config,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Binds a view to the context's tenant.
    ///
    /// # Errors
    ///
    /// `TenantContextMissing` if the context carries no tenant.
    pub fn scoped(&self, ctx: &RequestContext) -> Result<TenantLedger<'_>> {
        let tenant = ctx.require_tenant()?.clone();
        Ok(TenantLedger {
            ledger: self,
            ctx: ctx.clone(),
            tenant,
        })
    }

    // =========================================================================
    // Connections
    // =========================================================================

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        match &self.reader {
            Some(reader) => reader.lock().unwrap_or_else(PoisonError::into_inner),
            None => self.writer(),
        }
    }

    fn authorize(&self, ctx: &RequestContext, tenant_id: &TenantId, op: &str) -> Result<()> {
        ctx.authorize(tenant_id).map_err(|e| {
            warn!(op, requested = %tenant_id, error = %e, "tenant check rejected request");
            e
        })
    }

    /// Runs `f` inside an immediate transaction under the entity's lock.
    ///
    /// The transaction commits only when `f` returns `Ok`; otherwise it is
    /// dropped and rolled back.
    fn mutate<T>(
        &self,
        op: &'static str,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        f: impl FnOnce(&Connection, u64) -> Result<Outcome<T>>,
    ) -> Result<Outcome<T>> {
        let key = LockKey::new(tenant_id, entity_id);
        let _guard = self.locks.acquire(key, self.config.lock_timeout())?;
        debug!(op, tenant = %tenant_id, entity = %entity_id, "acquired entity lock");

        let mut conn = self.writer();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&tx, current_time_ms())?;
        tx.commit()?;
        Ok(outcome)
    }

    fn finish<T>(
        op: &'static str,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        result: Result<Outcome<T>>,
    ) -> Result<T> {
        match result {
            Ok(Outcome::Appended(record)) => {
                info!(op, tenant = %tenant_id, entity = %entity_id, "committed mutation");
                Ok(record)
            }
            Ok(Outcome::Existing(record)) => {
                debug!(op, tenant = %tenant_id, entity = %entity_id, "idempotent replay of stored record");
                Ok(record)
            }
            Err(e) => {
                warn!(op, tenant = %tenant_id, entity = %entity_id, error = %e, "rejected mutation");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Submits an event.
    ///
    /// An identical resubmission returns the stored record without writing.
    /// See [`writer::submit_event`] for the full list of rejections.
    pub fn submit(&self, ctx: &RequestContext, cmd: SubmitEvent) -> Result<EventRecord> {
        self.authorize(ctx, &cmd.tenant_id, "submit")?;
        let result = self.mutate("submit", &cmd.tenant_id, &cmd.entity.entity_id, |tx, now| {
            writer::submit_event(tx, &cmd, now)
        });
        Self::finish("submit", &cmd.tenant_id, &cmd.entity.entity_id, result)
    }

    /// Replaces the payload replay uses for one historical event.
    pub fn correct(&self, ctx: &RequestContext, cmd: CorrectEvent) -> Result<CorrectionRecord> {
        self.authorize(ctx, &cmd.tenant_id, "correct")?;
        let result = self.mutate("correct", &cmd.tenant_id, &cmd.entity_id, |tx, now| {
            writer::correct_event(tx, &cmd, now)
        });
        Self::finish("correct", &cmd.tenant_id, &cmd.entity_id, result)
    }

    /// Excludes one historical event (never the CREATE) from replay.
    pub fn rescind(&self, ctx: &RequestContext, cmd: RescindEvent) -> Result<RescindRecord> {
        self.authorize(ctx, &cmd.tenant_id, "rescind")?;
        let result = self.mutate("rescind", &cmd.tenant_id, &cmd.entity_id, |tx, now| {
            writer::rescind_event(tx, &cmd, now)
        });
        Self::finish("rescind", &cmd.tenant_id, &cmd.entity_id, result)
    }

    /// Regenerates an entity's versions from its logs.
    ///
    /// Runs under the entity lock like any mutation and appends nothing.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entity was never created.
    pub fn rebuild_versions(
        &self,
        ctx: &RequestContext,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Vec<Version>> {
        self.authorize(ctx, tenant_id, "rebuild")?;
        let result = self.mutate("rebuild", tenant_id, entity_id, |tx, _| {
            if reader::find_head(tx, tenant_id, entity_id)?.is_none() {
                return Err(not_found(tenant_id, entity_id));
            }
            writer::rematerialize(tx, tenant_id, entity_id)
                .map(|timeline| Outcome::Appended(timeline.versions))
        });
        Self::finish("rebuild", tenant_id, entity_id, result)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the version in effect on `as_of`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entity has no version covering that date (including
    /// dates before its CREATE).
    pub fn read_version_as_of(
        &self,
        ctx: &RequestContext,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        as_of: NaiveDate,
    ) -> Result<Version> {
        self.authorize(ctx, tenant_id, "read_version_as_of")?;
        let conn = self.reader();
        reader::version_as_of(&conn, tenant_id, entity_id, as_of)?.ok_or_else(|| {
            Error::NotFound(format!(
                "no version of entity '{entity_id}' in effect on {as_of}"
            ))
        })
    }

    /// Returns the entity's full materialized timeline.
    ///
    /// # Errors
    ///
    /// `NotFound` if the entity was never created.
    pub fn read_timeline(
        &self,
        ctx: &RequestContext,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Vec<Version>> {
        self.authorize(ctx, tenant_id, "read_timeline")?;
        let mut conn = self.reader();
        let tx = conn.transaction()?;
        if reader::find_head(&tx, tenant_id, entity_id)?.is_none() {
            return Err(not_found(tenant_id, entity_id));
        }
        reader::load_versions(&tx, tenant_id, entity_id)
    }

    /// Returns the newest entries of the entity's raw history.
    ///
    /// `limit` defaults to `audit_default_limit` and is clamped to
    /// `audit_max_limit`; zero is `InvalidArgument`. An unknown entity has
    /// an empty history.
    pub fn audit_history(
        &self,
        ctx: &RequestContext,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        limit: Option<u32>,
    ) -> Result<Vec<AuditEntry>> {
        self.authorize(ctx, tenant_id, "audit_history")?;
        let limit = self.config.audit_limit(limit)?;
        let mut conn = self.reader();
        let tx = conn.transaction()?;
        reader::audit_history(&tx, tenant_id, entity_id, limit)
    }

    /// Checks that the materialized versions match a fresh replay.
    ///
    /// Replays inside a read transaction and compares the result with both
    /// the stored digest and the stored rows. Returns `false` on any
    /// difference; nothing is repaired (see [`Ledger::rebuild_versions`]).
    pub fn verify_versions(
        &self,
        ctx: &RequestContext,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<bool> {
        self.authorize(ctx, tenant_id, "verify_versions")?;
        let mut conn = self.reader();
        let tx = conn.transaction()?;

        let head = reader::find_head(&tx, tenant_id, entity_id)?
            .ok_or_else(|| not_found(tenant_id, entity_id))?;
        let (fresh, _) = writer::replay_entity(&tx, tenant_id, entity_id)?;
        let stored = reader::load_versions(&tx, tenant_id, entity_id)?;

        let consistent =
            fresh.digest == head.timeline_digest && fresh.digest == timeline_digest(&stored);
        if !consistent {
            warn!(
                tenant = %tenant_id,
                entity = %entity_id,
                stored = %head.timeline_digest,
                replayed = %fresh.digest,
                "materialized versions diverge from replay"
            );
        }
        Ok(consistent)
    }
}

fn not_found(tenant_id: &TenantId, entity_id: &EntityId) -> Error {
    Error::NotFound(format!("entity '{entity_id}' in tenant '{tenant_id}'"))
}

// =============================================================================
// Tenant-bound View
// =============================================================================

/// A [`Ledger`] view bound to one tenant.
///
/// Commands passed to it must still name the same tenant; a command for
/// another tenant fails with `TenantMismatch`.
#[derive(Debug, Clone)]
pub struct TenantLedger<'a> {
    ledger: &'a Ledger,
    ctx: RequestContext,
    tenant: TenantId,
}

impl TenantLedger<'_> {
    /// The bound tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// See [`Ledger::submit`].
    pub fn submit(&self, cmd: SubmitEvent) -> Result<EventRecord> {
        self.ledger.submit(&self.ctx, cmd)
    }

    /// See [`Ledger::correct`].
    pub fn correct(&self, cmd: CorrectEvent) -> Result<CorrectionRecord> {
        self.ledger.correct(&self.ctx, cmd)
    }

    /// See [`Ledger::rescind`].
    pub fn rescind(&self, cmd: RescindEvent) -> Result<RescindRecord> {
        self.ledger.rescind(&self.ctx, cmd)
    }

    /// See [`Ledger::read_version_as_of`].
    pub fn read_version_as_of(&self, entity_id: &EntityId, as_of: NaiveDate) -> Result<Version> {
        self.ledger
            .read_version_as_of(&self.ctx, &self.tenant, entity_id, as_of)
    }

    /// See [`Ledger::read_timeline`].
    pub fn read_timeline(&self, entity_id: &EntityId) -> Result<Vec<Version>> {
        self.ledger.read_timeline(&self.ctx, &self.tenant, entity_id)
    }

    /// See [`Ledger::audit_history`].
    pub fn audit_history(&self, entity_id: &EntityId, limit: Option<u32>) -> Result<Vec<AuditEntry>> {
        self.ledger
            .audit_history(&self.ctx, &self.tenant, entity_id, limit)
    }

    /// See [`Ledger::rebuild_versions`].
    pub fn rebuild_versions(&self, entity_id: &EntityId) -> Result<Vec<Version>> {
        self.ledger.rebuild_versions(&self.ctx, &self.tenant, entity_id)
    }

    /// See [`Ledger::verify_versions`].
    pub fn verify_versions(&self, entity_id: &EntityId) -> Result<bool> {
        self.ledger.verify_versions(&self.ctx, &self.tenant, entity_id)
    }
}

// =============================================================================
// Tests
// =============================================================================
