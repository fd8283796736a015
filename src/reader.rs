//! # Ledger Reads
//!
//! Every query the ledger issues lives here, as free functions over a
//! `&Connection`. A `rusqlite::Transaction` derefs to `Connection`, so the
//! writer calls the same functions inside its immediate transaction that the
//! read path calls on the read-only connection.
//!
//! ## Tenant Scoping
//!
//! Every function that returns entity data takes the tenant and filters on
//! it in SQL. The only lookups keyed on an id alone are the idempotency-key
//! lookups (`event_id`, `correction_id`, `rescind_id`), whose callers compare
//! the stored tenant before returning anything.
//!
//! ## Row Decoding
//!
//! Rows are decoded outside rusqlite's mapping closures so that date and
//! payload parse failures surface as [`Error::Schema`] rather than being
//! squeezed into `rusqlite::Error`.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Params, Row};

use crate::codec::{format_date, parse_date};
use crate::error::{Error, Result};
use crate::types::{
    AuditEntry, CorrectionId, CorrectionRecord, EntityId, EntityKind, EventId, EventRecord,
    GlobalPos, Payload, RescindId, RescindRecord, SubmissionId, TenantId, Version,
};

// =============================================================================
// Column Lists
// =============================================================================

const EVENT_COLUMNS: &str = "global_pos, event_id, tenant_id, entity_id, entity_kind, event_type,
     effective_date, payload, submission_id, initiator_id, recorded_ms";

const CORRECTION_COLUMNS: &str = "global_pos, correction_id, tenant_id, entity_id, target_date,
     replacement_payload, submission_id, initiator_id, recorded_ms";

const RESCIND_COLUMNS: &str = "global_pos, rescind_id, tenant_id, entity_id, target_date,
     payload, submission_id, initiator_id, recorded_ms";

const VERSION_COLUMNS: &str = "tenant_id, entity_id, seq_no, attributes, valid_from, valid_to";

// =============================================================================
// Helper Functions
// =============================================================================

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    decode: impl Fn(&Row<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode(row)?);
    }
    Ok(out)
}

fn query_opt<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    decode: impl Fn(&Row<'_>) -> Result<T>,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => decode(row).map(Some),
        None => Ok(None),
    }
}

fn decode_payload(text: &str) -> Result<Payload> {
    Payload::parse(text).map_err(|e| Error::Schema(format!("invalid stored payload: {e}")))
}

fn decode_pos(raw: i64) -> GlobalPos {
    GlobalPos::from_raw_unchecked(raw as u64)
}

fn event_from_row(row: &Row<'_>) -> Result<EventRecord> {
    let kind: String = row.get(4)?;
    let event_type: String = row.get(5)?;
    let effective_date: String = row.get(6)?;
    let payload: String = row.get(7)?;
    let recorded_ms: i64 = row.get(10)?;

    Ok(EventRecord {
        global_pos: decode_pos(row.get(0)?),
        event_id: EventId::new(row.get::<_, String>(1)?),
        tenant_id: TenantId::new(row.get::<_, String>(2)?),
        entity_id: EntityId::new(row.get::<_, String>(3)?),
        entity_kind: kind
            .parse()
            .map_err(|_| Error::Schema(format!("unknown stored entity kind '{kind}'")))?,
        event_type: event_type
            .parse()
            .map_err(|_| Error::Schema(format!("unknown stored event type '{event_type}'")))?,
        effective_date: parse_date(&effective_date)?,
        payload: decode_payload(&payload)?,
        submission_id: SubmissionId::new(row.get::<_, String>(8)?),
        initiator_id: row.get::<_, String>(9)?.into(),
        recorded_ms: recorded_ms as u64,
    })
}

fn correction_from_row(row: &Row<'_>) -> Result<CorrectionRecord> {
    let target_date: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let recorded_ms: i64 = row.get(8)?;

    Ok(CorrectionRecord {
        global_pos: decode_pos(row.get(0)?),
        correction_id: CorrectionId::new(row.get::<_, String>(1)?),
        tenant_id: TenantId::new(row.get::<_, String>(2)?),
        entity_id: EntityId::new(row.get::<_, String>(3)?),
        target_date: parse_date(&target_date)?,
        replacement_payload: decode_payload(&payload)?,
        submission_id: SubmissionId::new(row.get::<_, String>(6)?),
        initiator_id: row.get::<_, String>(7)?.into(),
        recorded_ms: recorded_ms as u64,
    })
}

fn rescind_from_row(row: &Row<'_>) -> Result<RescindRecord> {
    let target_date: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let recorded_ms: i64 = row.get(8)?;

    Ok(RescindRecord {
        global_pos: decode_pos(row.get(0)?),
        rescind_id: RescindId::new(row.get::<_, String>(1)?),
        tenant_id: TenantId::new(row.get::<_, String>(2)?),
        entity_id: EntityId::new(row.get::<_, String>(3)?),
        target_date: parse_date(&target_date)?,
        payload: decode_payload(&payload)?,
        submission_id: SubmissionId::new(row.get::<_, String>(6)?),
        initiator_id: row.get::<_, String>(7)?.into(),
        recorded_ms: recorded_ms as u64,
    })
}

fn version_from_row(row: &Row<'_>) -> Result<Version> {
    let seq_no: i64 = row.get(2)?;
    let attributes: String = row.get(3)?;
    let valid_from: String = row.get(4)?;
    let valid_to: Option<String> = row.get(5)?;

    Ok(Version {
        tenant_id: TenantId::new(row.get::<_, String>(0)?),
        entity_id: EntityId::new(row.get::<_, String>(1)?),
        seq_no: u32::try_from(seq_no)
            .map_err(|_| Error::Schema(format!("invalid stored seq_no {seq_no}")))?,
        attributes: decode_payload(&attributes)?,
        valid_from: parse_date(&valid_from)?,
        valid_to: valid_to.as_deref().map(parse_date).transpose()?,
    })
}

// =============================================================================
// Positions and Identity
// =============================================================================

/// Returns the position the next appended row will take.
///
/// Must be called inside the writer's immediate transaction so no other
/// writer can claim the same position.
pub fn next_global_pos(conn: &Connection) -> Result<GlobalPos> {
    let max: i64 = conn.query_row(
        "SELECT MAX(
             COALESCE((SELECT MAX(global_pos) FROM events), 0),
             COALESCE((SELECT MAX(global_pos) FROM corrections), 0),
             COALESCE((SELECT MAX(global_pos) FROM rescinds), 0))",
        [],
        |row| row.get(0),
    )?;
    Ok(GlobalPos::from_raw_unchecked(max as u64).next())
}

/// The registry row of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHead {
    /// Kind fixed by the CREATE event.
    pub kind: EntityKind,
    /// Natural key, if the CREATE supplied one.
    pub owning_key: Option<String>,
    /// Number of materialized versions.
    pub version_count: u32,
    /// Digest of the materialized versions.
    pub timeline_digest: String,
    /// Highest position that touched the entity.
    pub last_pos: GlobalPos,
}

/// Looks up an entity's registry row.
pub fn find_head(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Option<EntityHead>> {
    query_opt(
        conn,
        "SELECT entity_kind, owning_key, version_count, timeline_digest, last_pos
         FROM entity_heads WHERE tenant_id = ? AND entity_id = ?",
        params![tenant_id.as_str(), entity_id.as_str()],
        |row| {
            let kind: String = row.get(0)?;
            let version_count: i64 = row.get(2)?;
            Ok(EntityHead {
                kind: kind
                    .parse()
                    .map_err(|_| Error::Schema(format!("unknown stored entity kind '{kind}'")))?,
                owning_key: row.get(1)?,
                version_count: version_count as u32,
                timeline_digest: row.get(3)?,
                last_pos: decode_pos(row.get(4)?),
            })
        },
    )
}

/// Resolves a natural key to the entity registered under it.
pub fn find_entity_by_owning_key(
    conn: &Connection,
    tenant_id: &TenantId,
    kind: EntityKind,
    owning_key: &str,
) -> Result<Option<EntityId>> {
    query_opt(
        conn,
        "SELECT entity_id FROM entity_heads
         WHERE tenant_id = ? AND entity_kind = ? AND owning_key = ?",
        params![tenant_id.as_str(), kind.as_str(), owning_key],
        |row| Ok(EntityId::new(row.get::<_, String>(0)?)),
    )
}

// =============================================================================
// Events
// =============================================================================

/// Looks up an event by its idempotency key, in any tenant.
pub fn find_event_by_id(conn: &Connection, event_id: &EventId) -> Result<Option<EventRecord>> {
    query_opt(
        conn,
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = ?"),
        params![event_id.as_str()],
        event_from_row,
    )
}

/// Looks up the event holding a submission token.
pub fn find_event_by_submission(
    conn: &Connection,
    tenant_id: &TenantId,
    submission_id: &SubmissionId,
) -> Result<Option<EventRecord>> {
    query_opt(
        conn,
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE tenant_id = ? AND submission_id = ?"),
        params![tenant_id.as_str(), submission_id.as_str()],
        event_from_row,
    )
}

/// Looks up the event on one date of one entity.
pub fn find_event_on(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
    date: NaiveDate,
) -> Result<Option<EventRecord>> {
    query_opt(
        conn,
        &format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE tenant_id = ? AND entity_id = ? AND effective_date = ?"
        ),
        params![tenant_id.as_str(), entity_id.as_str(), format_date(date)],
        event_from_row,
    )
}

/// Loads every event of an entity in replay order.
pub fn load_events(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Vec<EventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE tenant_id = ? AND entity_id = ?
             ORDER BY effective_date, global_pos"
        ),
        params![tenant_id.as_str(), entity_id.as_str()],
        event_from_row,
    )
}

// =============================================================================
// Corrections
// =============================================================================

/// Looks up a correction by its idempotency key, in any tenant.
pub fn find_correction_by_id(
    conn: &Connection,
    correction_id: &CorrectionId,
) -> Result<Option<CorrectionRecord>> {
    query_opt(
        conn,
        &format!("SELECT {CORRECTION_COLUMNS} FROM corrections WHERE correction_id = ?"),
        params![correction_id.as_str()],
        correction_from_row,
    )
}

/// Looks up the correction holding a submission token.
pub fn find_correction_by_submission(
    conn: &Connection,
    tenant_id: &TenantId,
    submission_id: &SubmissionId,
) -> Result<Option<CorrectionRecord>> {
    query_opt(
        conn,
        &format!(
            "SELECT {CORRECTION_COLUMNS} FROM corrections WHERE tenant_id = ? AND submission_id = ?"
        ),
        params![tenant_id.as_str(), submission_id.as_str()],
        correction_from_row,
    )
}

/// Looks up the correction targeting one date of one entity.
pub fn find_correction_on(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
    date: NaiveDate,
) -> Result<Option<CorrectionRecord>> {
    query_opt(
        conn,
        &format!(
            "SELECT {CORRECTION_COLUMNS} FROM corrections
             WHERE tenant_id = ? AND entity_id = ? AND target_date = ?"
        ),
        params![tenant_id.as_str(), entity_id.as_str(), format_date(date)],
        correction_from_row,
    )
}

/// Loads every correction of an entity.
pub fn load_corrections(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Vec<CorrectionRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {CORRECTION_COLUMNS} FROM corrections
             WHERE tenant_id = ? AND entity_id = ?
             ORDER BY global_pos"
        ),
        params![tenant_id.as_str(), entity_id.as_str()],
        correction_from_row,
    )
}

// =============================================================================
// Rescinds
// =============================================================================

/// Looks up a rescind by its idempotency key, in any tenant.
pub fn find_rescind_by_id(
    conn: &Connection,
    rescind_id: &RescindId,
) -> Result<Option<RescindRecord>> {
    query_opt(
        conn,
        &format!("SELECT {RESCIND_COLUMNS} FROM rescinds WHERE rescind_id = ?"),
        params![rescind_id.as_str()],
        rescind_from_row,
    )
}

/// Looks up the rescind holding a submission token.
pub fn find_rescind_by_submission(
    conn: &Connection,
    tenant_id: &TenantId,
    submission_id: &SubmissionId,
) -> Result<Option<RescindRecord>> {
    query_opt(
        conn,
        &format!("SELECT {RESCIND_COLUMNS} FROM rescinds WHERE tenant_id = ? AND submission_id = ?"),
        params![tenant_id.as_str(), submission_id.as_str()],
        rescind_from_row,
    )
}

/// Looks up the rescind targeting one date of one entity.
pub fn find_rescind_on(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
    date: NaiveDate,
) -> Result<Option<RescindRecord>> {
    query_opt(
        conn,
        &format!(
            "SELECT {RESCIND_COLUMNS} FROM rescinds
             WHERE tenant_id = ? AND entity_id = ? AND target_date = ?"
        ),
        params![tenant_id.as_str(), entity_id.as_str(), format_date(date)],
        rescind_from_row,
    )
}

/// Loads every rescind of an entity.
pub fn load_rescinds(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Vec<RescindRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {RESCIND_COLUMNS} FROM rescinds
             WHERE tenant_id = ? AND entity_id = ?
             ORDER BY global_pos"
        ),
        params![tenant_id.as_str(), entity_id.as_str()],
        rescind_from_row,
    )
}

// =============================================================================
// Versions
// =============================================================================

/// Returns the version whose interval contains `as_of`.
///
/// Intervals are half-open, so a date equal to a version's `valid_to`
/// belongs to the next version.
pub fn version_as_of(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
    as_of: NaiveDate,
) -> Result<Option<Version>> {
    let date = format_date(as_of);
    query_opt(
        conn,
        &format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE tenant_id = ? AND entity_id = ?
               AND valid_from <= ? AND (valid_to IS NULL OR valid_to > ?)
             ORDER BY valid_from DESC
             LIMIT 1"
        ),
        params![tenant_id.as_str(), entity_id.as_str(), date, date],
        version_from_row,
    )
}

/// Loads the full materialized timeline of an entity.
pub fn load_versions(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
) -> Result<Vec<Version>> {
    query_all(
        conn,
        &format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE tenant_id = ? AND entity_id = ?
             ORDER BY seq_no"
        ),
        params![tenant_id.as_str(), entity_id.as_str()],
        version_from_row,
    )
}

// =============================================================================
// Audit
// =============================================================================

/// Returns the newest `limit` entries of an entity's raw history.
///
/// Events, corrections and rescinds are merged newest-first by
/// `recorded_ms`, ties broken by position.
pub fn audit_history(
    conn: &Connection,
    tenant_id: &TenantId,
    entity_id: &EntityId,
    limit: u32,
) -> Result<Vec<AuditEntry>> {
    let tenant = tenant_id.as_str();
    let entity = entity_id.as_str();
    let limit = i64::from(limit);

    let mut entries: Vec<AuditEntry> = Vec::new();
    entries.extend(
        query_all(
            conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE tenant_id = ? AND entity_id = ?
                 ORDER BY recorded_ms DESC, global_pos DESC LIMIT ?"
            ),
            params![tenant, entity, limit],
            event_from_row,
        )?
        .into_iter()
        .map(AuditEntry::Event),
    );
    entries.extend(
        query_all(
            conn,
            &format!(
                "SELECT {CORRECTION_COLUMNS} FROM corrections WHERE tenant_id = ? AND entity_id = ?
                 ORDER BY recorded_ms DESC, global_pos DESC LIMIT ?"
            ),
            params![tenant, entity, limit],
            correction_from_row,
        )?
        .into_iter()
        .map(AuditEntry::Correction),
    );
    entries.extend(
        query_all(
            conn,
            &format!(
                "SELECT {RESCIND_COLUMNS} FROM rescinds WHERE tenant_id = ? AND entity_id = ?
                 ORDER BY recorded_ms DESC, global_pos DESC LIMIT ?"
            ),
            params![tenant, entity, limit],
            rescind_from_row,
        )?
        .into_iter()
        .map(AuditEntry::Rescind),
    );

    entries.sort_by(|a, b| {
        (b.recorded_ms(), b.global_pos()).cmp(&(a.recorded_ms(), a.global_pos()))
    });
    entries.truncate(limit as usize);
    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;

    fn setup_test_db() -> Connection {
        Database::open_in_memory().unwrap().into_connection()
    }

    fn insert_event(conn: &Connection, pos: i64, tenant: &str, entity: &str, date: &str, recorded_ms: i64) {
        conn.execute(
            "INSERT INTO events (global_pos, event_id, tenant_id, entity_id, entity_kind, event_type,
                 effective_date, payload, submission_id, initiator_id, recorded_ms)
             VALUES (?, ?, ?, ?, 'org_unit', ?, ?, '{\"name\":\"Ops\"}', ?, 'u', ?)",
            params![
                pos,
                format!("evt-{pos}"),
                tenant,
                entity,
                if pos == 1 { "CREATE" } else { "UPDATE" },
                date,
                format!("sub-{pos}"),
                recorded_ms
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_next_global_pos_spans_all_logs() {
        let conn = setup_test_db();
        assert_eq!(next_global_pos(&conn).unwrap(), GlobalPos::FIRST);

        insert_event(&conn, 1, "t", "ou-1", "2026-01-01", 10);
        conn.execute(
            "INSERT INTO rescinds (global_pos, rescind_id, tenant_id, entity_id, target_date,
                 payload, submission_id, initiator_id, recorded_ms)
             VALUES (7, 'r-1', 't', 'ou-1', '2026-01-01', '{}', 'sub-r', 'u', 11)",
            [],
        )
        .unwrap();
        assert_eq!(next_global_pos(&conn).unwrap(), GlobalPos::from_raw(8));
    }

    #[test]
    fn test_event_lookups_are_tenant_scoped() {
        let conn = setup_test_db();
        insert_event(&conn, 1, "t-a", "ou-1", "2026-01-01", 10);

        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(find_event_on(&conn, &"t-a".into(), &"ou-1".into(), date).unwrap().is_some());
        assert!(find_event_on(&conn, &"t-b".into(), &"ou-1".into(), date).unwrap().is_none());
        assert!(load_events(&conn, &"t-b".into(), &"ou-1".into()).unwrap().is_empty());

        let by_id = find_event_by_id(&conn, &"evt-1".into()).unwrap().unwrap();
        assert_eq!(by_id.tenant_id.as_str(), "t-a");
        assert_eq!(by_id.event_type, crate::types::EventType::Create);
    }

    #[test]
    fn test_version_as_of_half_open() {
        let conn = setup_test_db();
        conn.execute_batch(
            "INSERT INTO versions VALUES ('t', 'e', 1, '{\"name\":\"A\"}', '2026-01-01', '2026-02-01');
             INSERT INTO versions VALUES ('t', 'e', 2, '{\"name\":\"B\"}', '2026-02-01', NULL);",
        )
        .unwrap();

        let at = |d: &str| {
            version_as_of(&conn, &"t".into(), &"e".into(), parse_date(d).unwrap())
                .unwrap()
                .map(|v| v.seq_no)
        };
        assert_eq!(at("2025-12-31"), None);
        assert_eq!(at("2026-01-31"), Some(1));
        assert_eq!(at("2026-02-01"), Some(2));
        assert_eq!(at("2030-01-01"), Some(2));

        let all = load_versions(&conn, &"t".into(), &"e".into()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[1].is_open());
    }

    #[test]
    fn test_audit_history_newest_first() {
        let conn = setup_test_db();
        insert_event(&conn, 1, "t", "ou-1", "2026-01-01", 10);
        insert_event(&conn, 2, "t", "ou-1", "2026-02-01", 20);
        conn.execute(
            "INSERT INTO corrections (global_pos, correction_id, tenant_id, entity_id, target_date,
                 replacement_payload, submission_id, initiator_id, recorded_ms)
             VALUES (3, 'c-1', 't', 'ou-1', '2026-01-01', '{\"name\":\"Ops2\"}', 'sub-c', 'u', 20)",
            [],
        )
        .unwrap();

        let entries = audit_history(&conn, &"t".into(), &"ou-1".into(), 10).unwrap();
        let positions: Vec<u64> = entries.iter().map(|e| e.global_pos().as_raw()).collect();
        assert_eq!(positions, vec![3, 2, 1]);
        assert!(matches!(entries[0], AuditEntry::Correction(_)));

        let page = audit_history(&conn, &"t".into(), &"ou-1".into(), 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_corrupt_payload_is_schema_error() {
        let conn = setup_test_db();
        conn.execute(
            "INSERT INTO versions VALUES ('t', 'e', 1, 'not json', '2026-01-01', NULL)",
            [],
        )
        .unwrap();
        assert!(matches!(
            load_versions(&conn, &"t".into(), &"e".into()),
            Err(Error::Schema(_))
        ));
    }
}
