//! # Replay Engine
//!
//! Replay turns an entity's raw history into its version timeline. It is a
//! pure function of the three logs: it reads nothing and writes nothing, so
//! the same committed rows always produce byte-identical versions and the
//! same digest.
//!
//! ## Algorithm
//!
//! ```text
//! 1. drop every event whose date carries a rescind
//! 2. swap in the correction's replacement payload where one exists
//! 3. order by (effective_date, global_pos)
//! 4. fold:
//!      CREATE  -> state = payload          (must be first)
//!      UPDATE  -> state = state ⊕ payload  (must follow a CREATE)
//!      check state against the kind's rules
//! 5. version i covers [date_i, date_{i+1}); the last one is open-ended
//! ```
//!
//! The merge `⊕` overwrites present keys and removes keys whose new value
//! is JSON `null`.
//!
//! Two surviving events on one date (only possible with hand-edited data)
//! collapse into a single version: the later position wins and no zero-width
//! interval is emitted.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::codec::timeline_digest;
use crate::error::{Error, Result};
use crate::rules::KindRules;
use crate::types::{
    CorrectionRecord, EntityId, EntityKind, EventRecord, EventType, Payload, RescindRecord,
    TenantId, Version,
};

/// The result of replaying one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    /// Contiguous, non-overlapping versions in date order.
    pub versions: Vec<Version>,
    /// Digest of `versions` (see [`crate::codec::timeline_digest`]).
    pub digest: String,
}

impl Timeline {
    /// The version in effect on `date`, if any.
    pub fn as_of(&self, date: NaiveDate) -> Option<&Version> {
        self.versions.iter().find(|v| v.contains(date))
    }
}

/// Replays one entity's history.
///
/// `events`, `corrections` and `rescinds` must all belong to
/// `(tenant_id, entity_id)`; their order does not matter.
///
/// # Errors
///
/// - `InvalidEventSequence` for an UPDATE before the CREATE, a second
///   CREATE, or events of mixed kinds
/// - `InvalidArgument` when a merged state violates its kind's rules
pub fn replay(
    tenant_id: &TenantId,
    entity_id: &EntityId,
    events: &[EventRecord],
    corrections: &[CorrectionRecord],
    rescinds: &[RescindRecord],
) -> Result<Timeline> {
    let rescinded: HashSet<NaiveDate> = rescinds.iter().map(|r| r.target_date).collect();
    let replacements: HashMap<NaiveDate, &Payload> = corrections
        .iter()
        .map(|c| (c.target_date, &c.replacement_payload))
        .collect();

    let mut effective: Vec<&EventRecord> = events
        .iter()
        .filter(|e| !rescinded.contains(&e.effective_date))
        .collect();
    effective.sort_by_key(|e| (e.effective_date, e.global_pos));

    let sequence_error = |reason: String| Error::InvalidEventSequence {
        entity_id: entity_id.to_string(),
        reason,
    };

    let mut kind: Option<EntityKind> = None;
    let mut state: Option<Map<String, Value>> = None;
    let mut steps: Vec<(NaiveDate, Map<String, Value>)> = Vec::with_capacity(effective.len());

    for event in effective {
        match kind {
            None => kind = Some(event.entity_kind),
            Some(k) if k != event.entity_kind => {
                return Err(sequence_error(format!(
                    "event on {} is {} but the entity is {k}",
                    event.effective_date, event.entity_kind
                )));
            }
            Some(_) => {}
        }

        let payload = replacements
            .get(&event.effective_date)
            .copied()
            .unwrap_or(&event.payload);

        let next = match (event.event_type, state.take()) {
            (EventType::Create, None) => merge(Map::new(), payload),
            (EventType::Create, Some(_)) => {
                return Err(sequence_error(format!(
                    "second CREATE on {}",
                    event.effective_date
                )));
            }
            (EventType::Update, Some(prior)) => merge(prior, payload),
            (EventType::Update, None) => {
                return Err(sequence_error(format!(
                    "UPDATE on {} precedes any CREATE",
                    event.effective_date
                )));
            }
        };

        KindRules::for_kind(event.entity_kind)
            .validate(event.entity_kind, &next)
            .map_err(|e| match e {
                Error::InvalidArgument(msg) => Error::InvalidArgument(format!(
                    "{msg} after event on {}",
                    event.effective_date
                )),
                other => other,
            })?;

        match steps.last_mut() {
            Some((date, attrs)) if *date == event.effective_date => *attrs = next.clone(),
            _ => steps.push((event.effective_date, next.clone())),
        }
        state = Some(next);
    }

    let versions = stitch(tenant_id, entity_id, steps);
    let digest = timeline_digest(&versions);
    Ok(Timeline { versions, digest })
}

/// Present keys overwrite; `null` removes.
fn merge(mut state: Map<String, Value>, patch: &Payload) -> Map<String, Value> {
    for (key, value) in patch.as_map() {
        if value.is_null() {
            state.remove(key);
        } else {
            state.insert(key.clone(), value.clone());
        }
    }
    state
}

fn stitch(
    tenant_id: &TenantId,
    entity_id: &EntityId,
    steps: Vec<(NaiveDate, Map<String, Value>)>,
) -> Vec<Version> {
    let ends: Vec<Option<NaiveDate>> = steps
        .iter()
        .skip(1)
        .map(|(date, _)| Some(*date))
        .chain(std::iter::once(None))
        .collect();

    steps
        .into_iter()
        .zip(ends)
        .enumerate()
        .map(|(i, ((valid_from, attributes), valid_to))| Version {
            tenant_id: tenant_id.clone(),
            entity_id: entity_id.clone(),
            seq_no: u32::try_from(i + 1).unwrap_or(u32::MAX),
            attributes: Payload::from(attributes),
            valid_from,
            valid_to,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrectionId, EventId, GlobalPos, InitiatorId, RescindId, SubmissionId};
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn payload(value: Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    fn event(pos: u64, event_type: EventType, on: &str, body: Value) -> EventRecord {
        EventRecord {
            global_pos: GlobalPos::from_raw(pos),
            event_id: EventId::new(format!("evt-{pos}")),
            tenant_id: TenantId::new("t"),
            entity_id: EntityId::new("asg-1"),
            entity_kind: EntityKind::Assignment,
            event_type,
            effective_date: date(on),
            payload: payload(body),
            submission_id: SubmissionId::new(format!("sub-{pos}")),
            initiator_id: InitiatorId::new("u"),
            recorded_ms: pos,
        }
    }

    fn correction(pos: u64, on: &str, body: Value) -> CorrectionRecord {
        CorrectionRecord {
            global_pos: GlobalPos::from_raw(pos),
            correction_id: CorrectionId::new(format!("cor-{pos}")),
            tenant_id: TenantId::new("t"),
            entity_id: EntityId::new("asg-1"),
            target_date: date(on),
            replacement_payload: payload(body),
            submission_id: SubmissionId::new(format!("sub-{pos}")),
            initiator_id: InitiatorId::new("u"),
            recorded_ms: pos,
        }
    }

    fn rescind(pos: u64, on: &str) -> RescindRecord {
        RescindRecord {
            global_pos: GlobalPos::from_raw(pos),
            rescind_id: RescindId::new(format!("res-{pos}")),
            tenant_id: TenantId::new("t"),
            entity_id: EntityId::new("asg-1"),
            target_date: date(on),
            payload: Payload::empty(),
            submission_id: SubmissionId::new(format!("sub-{pos}")),
            initiator_id: InitiatorId::new("u"),
            recorded_ms: pos,
        }
    }

    fn run(events: &[EventRecord], corrections: &[CorrectionRecord], rescinds: &[RescindRecord]) -> Result<Timeline> {
        replay(&TenantId::new("t"), &EntityId::new("asg-1"), events, corrections, rescinds)
    }

    fn history() -> Vec<EventRecord> {
        vec![
            event(1, EventType::Create, "2026-01-01", json!({"position_id": "p-1", "status": "active"})),
            event(2, EventType::Update, "2026-02-01", json!({"status": "leave"})),
            event(3, EventType::Update, "2026-03-01", json!({"status": "active", "fte": 0.8})),
        ]
    }

    #[test]
    fn test_validity_stitching() {
        let timeline = run(&history(), &[], &[]).unwrap();
        let bounds: Vec<_> = timeline
            .versions
            .iter()
            .map(|v| (v.seq_no, v.valid_from, v.valid_to))
            .collect();
        assert_eq!(
            bounds,
            vec![
                (1, date("2026-01-01"), Some(date("2026-02-01"))),
                (2, date("2026-02-01"), Some(date("2026-03-01"))),
                (3, date("2026-03-01"), None),
            ]
        );
        assert_eq!(
            timeline.versions[2].attributes,
            payload(json!({"position_id": "p-1", "status": "active", "fte": 0.8}))
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let mut shuffled = history();
        shuffled.reverse();
        assert_eq!(run(&history(), &[], &[]).unwrap(), run(&shuffled, &[], &[]).unwrap());
    }

    #[test]
    fn test_correction_replaces_payload() {
        let corrections = [correction(4, "2026-02-01", json!({"status": "inactive"}))];
        let timeline = run(&history(), &corrections, &[]).unwrap();
        assert_eq!(
            timeline.as_of(date("2026-02-15")).unwrap().attributes.get("status"),
            Some(&json!("inactive"))
        );
    }

    #[test]
    fn test_rescind_merges_neighbouring_ranges() {
        let timeline = run(&history(), &[], &[rescind(4, "2026-02-01")]).unwrap();
        assert_eq!(timeline.versions.len(), 2);
        assert_eq!(timeline.versions[0].valid_to, Some(date("2026-03-01")));
        assert_eq!(
            timeline.as_of(date("2026-02-15")).unwrap().attributes.get("status"),
            Some(&json!("active"))
        );
    }

    #[test]
    fn test_null_removes_attribute() {
        let events = vec![
            event(1, EventType::Create, "2026-01-01", json!({"position_id": "p", "fte": 0.5})),
            event(2, EventType::Update, "2026-01-10", json!({"fte": null})),
        ];
        let timeline = run(&events, &[], &[]).unwrap();
        assert!(timeline.versions[1].attributes.get("fte").is_none());
    }

    #[test]
    fn test_update_before_create_is_rejected() {
        let events = vec![event(1, EventType::Update, "2026-01-01", json!({"status": "active"}))];
        assert!(matches!(
            run(&events, &[], &[]),
            Err(Error::InvalidEventSequence { .. })
        ));

        let events = vec![
            event(1, EventType::Create, "2026-01-01", json!({"position_id": "p"})),
            event(2, EventType::Create, "2026-02-01", json!({"position_id": "q"})),
        ];
        assert!(matches!(
            run(&events, &[], &[]),
            Err(Error::InvalidEventSequence { reason, .. }) if reason.contains("second CREATE")
        ));
    }

    #[test]
    fn test_rule_violation_names_the_date() {
        let events = vec![
            event(1, EventType::Create, "2026-01-01", json!({"position_id": "p"})),
            event(2, EventType::Update, "2026-01-05", json!({"fte": 3})),
        ];
        assert!(matches!(
            run(&events, &[], &[]),
            Err(Error::InvalidArgument(msg)) if msg.contains("2026-01-05")
        ));
    }

    #[test]
    fn test_same_date_later_position_wins() {
        let events = vec![
            event(1, EventType::Create, "2026-01-01", json!({"position_id": "p", "status": "active"})),
            event(2, EventType::Update, "2026-01-01", json!({"status": "leave"})),
        ];
        let timeline = run(&events, &[], &[]).unwrap();
        assert_eq!(timeline.versions.len(), 1);
        assert_eq!(timeline.versions[0].attributes.get("status"), Some(&json!("leave")));
    }

    #[test]
    fn test_empty_history_gives_empty_timeline() {
        let timeline = run(&[], &[], &[]).unwrap();
        assert!(timeline.versions.is_empty());
        assert!(timeline.as_of(date("2026-01-01")).is_none());
    }
}
