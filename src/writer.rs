//! # Ledger Writes
//!
//! This module implements the three mutations (submit, correct, rescind) and
//! the rematerialization that follows each of them. Every function takes an
//! open transaction; the caller ([`crate::Ledger`]) owns the per-entity lock
//! and the `BEGIN IMMEDIATE` boundary, and commits only when the function
//! returns `Ok`.
//!
//! ## Mutation Flow
//!
//! ```text
//!   lock(tenant, entity) ─► BEGIN IMMEDIATE
//!          │
//!          ▼
//!   idempotency checks ──(same content)──► Outcome::Existing   (no writes)
//!          │                      └─(different)──► error       (rollback)
//!          ▼
//!   append row at next_global_pos
//!          │
//!          ▼
//!   replay ─► DELETE versions ─► INSERT versions ─► UPDATE entity_heads
//!          │
//!          ▼
//!   COMMIT ─► unlock
//! ```
//!
//! A replay failure returns an error before commit, so the appended row is
//! rolled back together with everything else.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::codec::format_date;
use crate::error::{Error, Result};
use crate::reader;
use crate::replay::{replay, Timeline};
use crate::types::{
    CorrectEvent, CorrectionRecord, EntityId, EventRecord, EventType, GlobalPos, RescindEvent,
    RescindRecord, SubmitEvent, TenantId,
};

// =============================================================================
// Outcome
// =============================================================================

/// What a mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// An identical record was already stored; nothing was written.
    Existing(T),
    /// A new record was appended and the timeline rematerialized.
    Appended(T),
}

impl<T> Outcome<T> {
    /// Returns the record either way.
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Existing(record) | Outcome::Appended(record) => record,
        }
    }

    /// Returns true if a new row was written.
    pub fn is_appended(&self) -> bool {
        matches!(self, Outcome::Appended(_))
    }
}

// =============================================================================
// Submit
// =============================================================================

/// Appends an event, or returns the identical stored one.
///
/// # Errors
///
/// - `ReusedIdempotencyKey` when `event_id` or `submission_id` is held by
///   different content
/// - `EventDateConflict` when the entity already has a different event on
///   the same date, or any event on a rescinded date
/// - `InvalidArgument` when the kind or owning key disagrees with the
///   registered identity, or when the merged state breaks a rule
/// - `InvalidEventSequence` when replay cannot explain the new history
pub fn submit_event(
    conn: &Connection,
    cmd: &SubmitEvent,
    recorded_ms: u64,
) -> Result<Outcome<EventRecord>> {
    cmd.validate()?;
    let tenant = &cmd.tenant_id;
    let entity = &cmd.entity.entity_id;

    if let Some(stored) = reader::find_event_by_id(conn, &cmd.event_id)? {
        if stored.matches(cmd) {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.event_id.to_string(),
        });
    }

    if reader::find_event_by_submission(conn, tenant, &cmd.submission_id)?.is_some() {
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.submission_id.to_string(),
        });
    }

    // Identity first: a same-date duplicate must still name the right kind.
    let global_pos = reader::next_global_pos(conn)?;
    resolve_identity(conn, cmd, global_pos)?;

    if let Some(stored) = reader::find_event_on(conn, tenant, entity, cmd.effective_date)? {
        // A rescinded date stays occupied; its event is no longer in effect.
        let rescinded = reader::find_rescind_on(conn, tenant, entity, cmd.effective_date)?;
        if rescinded.is_none()
            && stored.event_type == cmd.event_type
            && stored.payload == cmd.payload
        {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::EventDateConflict {
            entity_id: entity.to_string(),
            effective_date: cmd.effective_date,
        });
    }

    conn.execute(
        "INSERT INTO events (global_pos, event_id, tenant_id, entity_id, entity_kind, event_type,
             effective_date, payload, submission_id, initiator_id, recorded_ms)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            global_pos.as_raw() as i64,
            cmd.event_id.as_str(),
            tenant.as_str(),
            entity.as_str(),
            cmd.entity.kind.as_str(),
            cmd.event_type.as_str(),
            format_date(cmd.effective_date),
            cmd.payload.canonical(),
            cmd.submission_id.as_str(),
            cmd.initiator_id.as_str(),
            recorded_ms as i64,
        ],
    )?;

    rematerialize(conn, tenant, entity)?;

    Ok(Outcome::Appended(EventRecord {
        global_pos,
        event_id: cmd.event_id.clone(),
        tenant_id: tenant.clone(),
        entity_id: entity.clone(),
        entity_kind: cmd.entity.kind,
        event_type: cmd.event_type,
        effective_date: cmd.effective_date,
        payload: cmd.payload.clone(),
        submission_id: cmd.submission_id.clone(),
        initiator_id: cmd.initiator_id.clone(),
        recorded_ms,
    }))
}

/// Checks the submission against the registered identity, registering the
/// entity on its CREATE.
///
/// An UPDATE for an unregistered entity is let through: replay rejects it
/// with `InvalidEventSequence`.
fn resolve_identity(conn: &Connection, cmd: &SubmitEvent, global_pos: GlobalPos) -> Result<()> {
    let tenant = &cmd.tenant_id;
    let entity = &cmd.entity.entity_id;

    if let Some(head) = reader::find_head(conn, tenant, entity)? {
        if head.kind != cmd.entity.kind {
            return Err(Error::InvalidArgument(format!(
                "entity '{entity}' is a {}, not a {}",
                head.kind, cmd.entity.kind
            )));
        }
        if let Some(key) = &cmd.entity.owning_key {
            if head.owning_key.as_deref() != Some(key.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "owning key '{key}' does not identify entity '{entity}'"
                )));
            }
        }
        return Ok(());
    }

    if cmd.event_type != EventType::Create {
        return Ok(());
    }

    if let Some(key) = &cmd.entity.owning_key {
        if let Some(other) = reader::find_entity_by_owning_key(conn, tenant, cmd.entity.kind, key)? {
            return Err(Error::InvalidArgument(format!(
                "owning key '{key}' already identifies {} '{other}'",
                cmd.entity.kind
            )));
        }
    }

    conn.execute(
        "INSERT INTO entity_heads (tenant_id, entity_id, entity_kind, owning_key,
             version_count, timeline_digest, last_pos)
         VALUES (?, ?, ?, ?, 0, '', ?)",
        params![
            tenant.as_str(),
            entity.as_str(),
            cmd.entity.kind.as_str(),
            cmd.entity.owning_key.as_deref(),
            global_pos.as_raw() as i64,
        ],
    )?;
    debug!(tenant = %tenant, entity = %entity, kind = %cmd.entity.kind, "registered entity");
    Ok(())
}

// =============================================================================
// Correct
// =============================================================================

/// Appends a correction, or returns the identical stored one.
///
/// # Errors
///
/// - `EventNotFound` when no event exists on the target date
/// - `AlreadyRescinded` when the target date is rescinded
/// - `ReusedIdempotencyKey` when the correction id or submission token is
///   held by different content
/// - `AlreadyCorrected` when the date carries a different correction
/// - replay errors for the corrected history
pub fn correct_event(
    conn: &Connection,
    cmd: &CorrectEvent,
    recorded_ms: u64,
) -> Result<Outcome<CorrectionRecord>> {
    cmd.validate()?;
    let tenant = &cmd.tenant_id;
    let entity = &cmd.entity_id;
    let date = cmd.target_date;

    if reader::find_event_on(conn, tenant, entity, date)?.is_none() {
        return Err(Error::EventNotFound {
            entity_id: entity.to_string(),
            effective_date: date,
        });
    }

    if reader::find_rescind_on(conn, tenant, entity, date)?.is_some() {
        return Err(Error::AlreadyRescinded {
            entity_id: entity.to_string(),
            effective_date: date,
        });
    }

    if let Some(stored) = reader::find_correction_by_id(conn, &cmd.correction_id)? {
        if stored.matches(cmd) {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.correction_id.to_string(),
        });
    }

    if reader::find_correction_by_submission(conn, tenant, &cmd.submission_id)?.is_some() {
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.submission_id.to_string(),
        });
    }

    if let Some(stored) = reader::find_correction_on(conn, tenant, entity, date)? {
        if stored.replacement_payload == cmd.replacement_payload {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::AlreadyCorrected {
            entity_id: entity.to_string(),
            effective_date: date,
        });
    }

    let global_pos = reader::next_global_pos(conn)?;
    conn.execute(
        "INSERT INTO corrections (global_pos, correction_id, tenant_id, entity_id, target_date,
             replacement_payload, submission_id, initiator_id, recorded_ms)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            global_pos.as_raw() as i64,
            cmd.correction_id.as_str(),
            tenant.as_str(),
            entity.as_str(),
            format_date(date),
            cmd.replacement_payload.canonical(),
            cmd.submission_id.as_str(),
            cmd.initiator_id.as_str(),
            recorded_ms as i64,
        ],
    )?;

    rematerialize(conn, tenant, entity)?;

    Ok(Outcome::Appended(CorrectionRecord {
        global_pos,
        correction_id: cmd.correction_id.clone(),
        tenant_id: tenant.clone(),
        entity_id: entity.clone(),
        target_date: date,
        replacement_payload: cmd.replacement_payload.clone(),
        submission_id: cmd.submission_id.clone(),
        initiator_id: cmd.initiator_id.clone(),
        recorded_ms,
    }))
}

// =============================================================================
// Rescind
// =============================================================================

/// Appends a rescind, or returns the identical stored one.
///
/// # Errors
///
/// - `EventNotFound` when no event exists on the target date
/// - `CreateCannotBeRescinded` when the target is the CREATE event
/// - `ReusedIdempotencyKey` when the rescind id or submission token is held
///   by different content
/// - `AlreadyRescinded` when the date carries a different rescind
/// - replay errors for the remaining history
pub fn rescind_event(
    conn: &Connection,
    cmd: &RescindEvent,
    recorded_ms: u64,
) -> Result<Outcome<RescindRecord>> {
    cmd.validate()?;
    let tenant = &cmd.tenant_id;
    let entity = &cmd.entity_id;
    let date = cmd.target_date;

    let target = reader::find_event_on(conn, tenant, entity, date)?.ok_or_else(|| {
        Error::EventNotFound {
            entity_id: entity.to_string(),
            effective_date: date,
        }
    })?;

    if target.event_type == EventType::Create {
        return Err(Error::CreateCannotBeRescinded {
            entity_id: entity.to_string(),
            effective_date: date,
        });
    }

    if let Some(stored) = reader::find_rescind_by_id(conn, &cmd.rescind_id)? {
        if stored.matches(cmd) {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.rescind_id.to_string(),
        });
    }

    if reader::find_rescind_by_submission(conn, tenant, &cmd.submission_id)?.is_some() {
        return Err(Error::ReusedIdempotencyKey {
            key: cmd.submission_id.to_string(),
        });
    }

    if let Some(stored) = reader::find_rescind_on(conn, tenant, entity, date)? {
        if stored.payload == cmd.payload {
            return Ok(Outcome::Existing(stored));
        }
        return Err(Error::AlreadyRescinded {
            entity_id: entity.to_string(),
            effective_date: date,
        });
    }

    let global_pos = reader::next_global_pos(conn)?;
    conn.execute(
        "INSERT INTO rescinds (global_pos, rescind_id, tenant_id, entity_id, target_date,
             payload, submission_id, initiator_id, recorded_ms)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            global_pos.as_raw() as i64,
            cmd.rescind_id.as_str(),
            tenant.as_str(),
            entity.as_str(),
            format_date(date),
            cmd.payload.canonical(),
            cmd.submission_id.as_str(),
            cmd.initiator_id.as_str(),
            recorded_ms as i64,
        ],
    )?;

    rematerialize(conn, tenant, entity)?;

    Ok(Outcome::Appended(RescindRecord {
        global_pos,
        rescind_id: cmd.rescind_id.clone(),
        tenant_id: tenant.clone(),
        entity_id: entity.clone(),
        target_date: date,
        payload: cmd.payload.clone(),
        submission_id: cmd.submission_id.clone(),
        initiator_id: cmd.initiator_id.clone(),
        recorded_ms,
    }))
}

// =============================================================================
// Rematerialization
// =============================================================================

/// Replays an entity from its logs without writing anything.
pub fn replay_entity(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<(Timeline, Option<GlobalPos>)> {
    let events = reader::load_events(conn, tenant_id, entity_id)?;
    let corrections = reader::load_corrections(conn, tenant_id, entity_id)?;
    let rescinds = reader::load_rescinds(conn, tenant_id, entity_id)?;

    let last_pos = events
        .iter()
        .map(|e| e.global_pos)
        .chain(corrections.iter().map(|c| c.global_pos))
        .chain(rescinds.iter().map(|r| r.global_pos))
        .max();

    let timeline = replay(tenant_id, entity_id, &events, &corrections, &rescinds)?;
    Ok((timeline, last_pos))
}

/// Replays an entity and replaces its materialized versions.
///
/// The versions table and the head's digest are rewritten as a whole; no
/// incremental update is attempted.
pub fn rematerialize(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Timeline> {
    let (timeline, last_pos) = replay_entity(conn, tenant_id, entity_id)?;

    conn.execute(
        "DELETE FROM versions WHERE tenant_id = ? AND entity_id = ?",
        params![tenant_id.as_str(), entity_id.as_str()],
    )?;

    {
        let mut insert = conn.prepare_cached(
            "INSERT INTO versions (tenant_id, entity_id, seq_no, attributes, valid_from, valid_to)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for version in &timeline.versions {
            insert.execute(params![
                tenant_id.as_str(),
                entity_id.as_str(),
                i64::from(version.seq_no),
                version.attributes.canonical(),
                format_date(version.valid_from),
                version.valid_to.map(format_date),
            ])?;
        }
    }

    conn.execute(
        "UPDATE entity_heads
         SET version_count = ?, timeline_digest = ?, last_pos = COALESCE(?, last_pos)
         WHERE tenant_id = ? AND entity_id = ?",
        params![
            timeline.versions.len() as i64,
            timeline.digest,
            last_pos.map(|p| p.as_raw() as i64),
            tenant_id.as_str(),
            entity_id.as_str(),
        ],
    )?;

    debug!(
        tenant = %tenant_id,
        entity = %entity_id,
        versions = timeline.versions.len(),
        digest = %timeline.digest,
        "replayed entity"
    );
    Ok(timeline)
}

// =============================================================================
// Tests
// =============================================================================
