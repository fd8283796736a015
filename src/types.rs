//! # Domain Types for TimelineDB
//!
//! This module defines the core types of the temporal ledger: identifiers,
//! event types, entity kinds, payloads, the commands callers submit and the
//! records the ledger hands back.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Every identifier is its own type. A function that takes an [`EntityId`]
//! will not accept a [`TenantId`] by accident, and signatures document what
//! each string means.
//!
//! ## Invariants
//!
//! - [`GlobalPos`]: strictly increasing across events, corrections and
//!   rescinds; never reused, never zero. It is the insertion order used to
//!   break ties during replay and to order audit history.
//! - [`Payload`]: always a JSON object; equality is equality of the
//!   canonical encoding (see [`crate::codec::canonical_json`]).
//! - [`Version`]: half-open validity `[valid_from, valid_to)`, where
//!   `valid_to = None` means open-ended.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec::{canonical_json, check_depth};
use crate::error::{Error, Result};

// =============================================================================
// Identifiers
// =============================================================================

/// Declares a string-backed identifier newtype.
///
/// All identifiers share the same shape: construction from anything
/// `Into<String>`, `as_str`, `Display`, and `From<&str>`/`From<String>`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty or only whitespace.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// The organization that owns a slice of ledger data.
    ///
    /// Every row in every table carries a tenant id, and every query filters
    /// on it.
    TenantId
);

string_id!(
    /// A ledger entity: one assignment, org unit, payroll run, holiday
    /// calendar or time profile.
    EntityId
);

string_id!(
    /// Idempotency key of an event. Globally unique across tenants.
    EventId
);

string_id!(
    /// Idempotency key of a correction.
    CorrectionId
);

string_id!(
    /// Idempotency key of a rescind.
    RescindId
);

string_id!(
    /// Caller-supplied request token, unique per tenant within each log.
    SubmissionId
);

string_id!(
    /// The principal that issued a mutation.
    InitiatorId
);

// =============================================================================
// Positions
// =============================================================================

/// A position in the ledger's global append order.
///
/// Events, corrections and rescinds all draw positions from the same
/// sequence, so a position identifies exactly one appended row and orders
/// all three logs relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GlobalPos(u64);

impl GlobalPos {
    /// The first valid position (1, not 0).
    pub const FIRST: GlobalPos = GlobalPos(1);

    /// Creates a GlobalPos from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is 0.
    pub fn from_raw(value: u64) -> Self {
        assert!(value > 0, "GlobalPos cannot be zero");
        Self(value)
    }

    /// Creates a GlobalPos without checking for zero (trusted database reads).
    pub fn from_raw_unchecked(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the next position.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GlobalPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Event Types and Entity Kinds
// =============================================================================

/// Whether an event founds an entity or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// The entity's first, foundational event.
    Create,
    /// A change merged into the prior state.
    Update,
}

impl EventType {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(EventType::Create),
            "UPDATE" => Ok(EventType::Update),
            other => Err(Error::InvalidArgument(format!(
                "unknown event type '{other}', expected CREATE or UPDATE"
            ))),
        }
    }
}

/// The kinds of entity the ledger keeps timelines for.
///
/// Each kind shares the same event/overlay/replay machinery and differs only
/// in the rules applied to its state (see [`crate::rules`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A staffing assignment of a person to a position.
    Assignment,
    /// A node of the organization tree.
    OrgUnit,
    /// One payroll calculation run for a pay period.
    PayrollRun,
    /// A day classification in a country's holiday calendar.
    HolidayCalendar,
    /// A working-time profile.
    TimeProfile,
}

impl EntityKind {
    /// All kinds, in declaration order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Assignment,
        EntityKind::OrgUnit,
        EntityKind::PayrollRun,
        EntityKind::HolidayCalendar,
        EntityKind::TimeProfile,
    ];

    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Assignment => "assignment",
            EntityKind::OrgUnit => "org_unit",
            EntityKind::PayrollRun => "payroll_run",
            EntityKind::HolidayCalendar => "holiday_calendar",
            EntityKind::TimeProfile => "time_profile",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown entity kind '{s}'")))
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// An opaque key-value document attached to events, corrections and rescinds.
///
/// # Equality
///
/// Two payloads are equal when their canonical encodings are equal. Key
/// order and whitespace of the original input never matter, so
/// `{"a":1,"b":2}` equals `{ "b": 2, "a": 1 }`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// An empty payload (`{}`).
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        check_depth(&value)?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidArgument(format!(
                "payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parses a payload from JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Returns the canonical encoding used for storage and comparison.
    pub fn canonical(&self) -> String {
        canonical_json(&Value::Object(self.0.clone()))
    }

    /// Returns the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Looks up one attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Payload {}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Payload {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Commands
// =============================================================================

/// How a submission identifies the entity it is about.
///
/// `owning_key` is the natural key callers know the entity by (for an
/// assignment, the person plus assignment type). It is registered by the
/// CREATE event; later events may repeat it, and it must then match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// The entity the event belongs to.
    pub entity_id: EntityId,
    /// The entity's kind.
    pub kind: EntityKind,
    /// Optional natural key, unique per (tenant, kind).
    pub owning_key: Option<String>,
}

impl EntityRef {
    /// References an entity without a natural key.
    pub fn new(entity_id: impl Into<EntityId>, kind: EntityKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            owning_key: None,
        }
    }

    /// Attaches a natural key (builder pattern).
    pub fn with_owning_key(mut self, owning_key: impl Into<String>) -> Self {
        self.owning_key = Some(owning_key.into());
        self
    }
}

/// A request to append one event to an entity's log.
#[derive(Debug, Clone)]
pub struct SubmitEvent {
    /// Idempotency key of the event.
    pub event_id: EventId,
    /// Tenant the event is submitted for.
    pub tenant_id: TenantId,
    /// The entity the event belongs to.
    pub entity: EntityRef,
    /// CREATE or UPDATE.
    pub event_type: EventType,
    /// The date the fact takes effect.
    pub effective_date: NaiveDate,
    /// The fact itself.
    pub payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who submitted it.
    pub initiator_id: InitiatorId,
}

impl SubmitEvent {
    /// Builds a CREATE submission.
    ///
    /// The event, submission and initiator ids can be set afterwards with
    /// [`SubmitEvent::with_ids`]; by default the submission id mirrors the
    /// event id and the initiator is `"system"`.
    pub fn create(
        event_id: impl Into<EventId>,
        tenant_id: impl Into<TenantId>,
        entity: EntityRef,
        effective_date: NaiveDate,
        payload: Payload,
    ) -> Self {
        Self::build(event_id, tenant_id, entity, EventType::Create, effective_date, payload)
    }

    /// Builds an UPDATE submission.
    pub fn update(
        event_id: impl Into<EventId>,
        tenant_id: impl Into<TenantId>,
        entity: EntityRef,
        effective_date: NaiveDate,
        payload: Payload,
    ) -> Self {
        Self::build(event_id, tenant_id, entity, EventType::Update, effective_date, payload)
    }

    fn build(
        event_id: impl Into<EventId>,
        tenant_id: impl Into<TenantId>,
        entity: EntityRef,
        event_type: EventType,
        effective_date: NaiveDate,
        payload: Payload,
    ) -> Self {
        let event_id = event_id.into();
        Self {
            submission_id: SubmissionId::new(event_id.as_str()),
            event_id,
            tenant_id: tenant_id.into(),
            entity,
            event_type,
            effective_date,
            payload,
            initiator_id: InitiatorId::new("system"),
        }
    }

    /// Overrides the submission and initiator ids (builder pattern).
    pub fn with_ids(
        mut self,
        submission_id: impl Into<SubmissionId>,
        initiator_id: impl Into<InitiatorId>,
    ) -> Self {
        self.submission_id = submission_id.into();
        self.initiator_id = initiator_id.into();
        self
    }

    /// Checks the identifiers every submission must carry.
    pub fn validate(&self) -> Result<()> {
        require("event_id", self.event_id.is_blank())?;
        require("tenant_id", self.tenant_id.is_blank())?;
        require("entity_id", self.entity.entity_id.is_blank())?;
        require("submission_id", self.submission_id.is_blank())?;
        require("initiator_id", self.initiator_id.is_blank())?;
        if let Some(key) = &self.entity.owning_key {
            require("owning_key", key.trim().is_empty())?;
        }
        Ok(())
    }
}

/// A request to replace the payload of one historical event.
#[derive(Debug, Clone)]
pub struct CorrectEvent {
    /// Idempotency key of the correction.
    pub correction_id: CorrectionId,
    /// Tenant of the entity.
    pub tenant_id: TenantId,
    /// The entity whose event is corrected.
    pub entity_id: EntityId,
    /// Effective date of the event being corrected.
    pub target_date: NaiveDate,
    /// The payload replay uses instead of the original.
    pub replacement_payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who issued the correction.
    pub initiator_id: InitiatorId,
}

impl CorrectEvent {
    /// Builds a correction; the submission id mirrors the correction id.
    pub fn new(
        correction_id: impl Into<CorrectionId>,
        tenant_id: impl Into<TenantId>,
        entity_id: impl Into<EntityId>,
        target_date: NaiveDate,
        replacement_payload: Payload,
    ) -> Self {
        let correction_id = correction_id.into();
        Self {
            submission_id: SubmissionId::new(correction_id.as_str()),
            correction_id,
            tenant_id: tenant_id.into(),
            entity_id: entity_id.into(),
            target_date,
            replacement_payload,
            initiator_id: InitiatorId::new("system"),
        }
    }

    /// Overrides the submission and initiator ids (builder pattern).
    pub fn with_ids(
        mut self,
        submission_id: impl Into<SubmissionId>,
        initiator_id: impl Into<InitiatorId>,
    ) -> Self {
        self.submission_id = submission_id.into();
        self.initiator_id = initiator_id.into();
        self
    }

    /// Checks the identifiers every correction must carry.
    pub fn validate(&self) -> Result<()> {
        require("correction_id", self.correction_id.is_blank())?;
        require("tenant_id", self.tenant_id.is_blank())?;
        require("entity_id", self.entity_id.is_blank())?;
        require("submission_id", self.submission_id.is_blank())?;
        require("initiator_id", self.initiator_id.is_blank())
    }
}

/// A request to exclude one historical event from the timeline.
#[derive(Debug, Clone)]
pub struct RescindEvent {
    /// Idempotency key of the rescind.
    pub rescind_id: RescindId,
    /// Tenant of the entity.
    pub tenant_id: TenantId,
    /// The entity whose event is rescinded.
    pub entity_id: EntityId,
    /// Effective date of the event being rescinded.
    pub target_date: NaiveDate,
    /// Audit metadata (reason, ticket reference). Not used by replay.
    pub payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who issued the rescind.
    pub initiator_id: InitiatorId,
}

impl RescindEvent {
    /// Builds a rescind; the submission id mirrors the rescind id.
    pub fn new(
        rescind_id: impl Into<RescindId>,
        tenant_id: impl Into<TenantId>,
        entity_id: impl Into<EntityId>,
        target_date: NaiveDate,
        payload: Payload,
    ) -> Self {
        let rescind_id = rescind_id.into();
        Self {
            submission_id: SubmissionId::new(rescind_id.as_str()),
            rescind_id,
            tenant_id: tenant_id.into(),
            entity_id: entity_id.into(),
            target_date,
            payload,
            initiator_id: InitiatorId::new("system"),
        }
    }

    /// Overrides the submission and initiator ids (builder pattern).
    pub fn with_ids(
        mut self,
        submission_id: impl Into<SubmissionId>,
        initiator_id: impl Into<InitiatorId>,
    ) -> Self {
        self.submission_id = submission_id.into();
        self.initiator_id = initiator_id.into();
        self
    }

    /// Checks the identifiers every rescind must carry.
    pub fn validate(&self) -> Result<()> {
        require("rescind_id", self.rescind_id.is_blank())?;
        require("tenant_id", self.tenant_id.is_blank())?;
        require("entity_id", self.entity_id.is_blank())?;
        require("submission_id", self.submission_id.is_blank())?;
        require("initiator_id", self.initiator_id.is_blank())
    }
}

fn require(field: &str, blank: bool) -> Result<()> {
    if blank {
        return Err(Error::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

// =============================================================================
// Stored Records
// =============================================================================

/// A stored event, as appended to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Position in the global append order.
    pub global_pos: GlobalPos,
    /// Idempotency key.
    pub event_id: EventId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The entity the event belongs to.
    pub entity_id: EntityId,
    /// The entity's kind.
    pub entity_kind: EntityKind,
    /// CREATE or UPDATE.
    pub event_type: EventType,
    /// The date the fact takes effect.
    pub effective_date: NaiveDate,
    /// The original payload (never rewritten by corrections).
    pub payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who submitted it.
    pub initiator_id: InitiatorId,
    /// When it was recorded (Unix milliseconds).
    pub recorded_ms: u64,
}

impl EventRecord {
    /// Returns true if `cmd` describes exactly this event.
    ///
    /// Every semantic field takes part; `global_pos` and `recorded_ms` are
    /// assigned by the ledger and do not.
    pub fn matches(&self, cmd: &SubmitEvent) -> bool {
        self.event_id == cmd.event_id
            && self.tenant_id == cmd.tenant_id
            && self.entity_id == cmd.entity.entity_id
            && self.entity_kind == cmd.entity.kind
            && self.event_type == cmd.event_type
            && self.effective_date == cmd.effective_date
            && self.payload == cmd.payload
            && self.submission_id == cmd.submission_id
            && self.initiator_id == cmd.initiator_id
    }
}

/// A stored correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectionRecord {
    /// Position in the global append order.
    pub global_pos: GlobalPos,
    /// Idempotency key.
    pub correction_id: CorrectionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The corrected entity.
    pub entity_id: EntityId,
    /// Effective date of the corrected event.
    pub target_date: NaiveDate,
    /// The payload replay uses instead of the original.
    pub replacement_payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who issued it.
    pub initiator_id: InitiatorId,
    /// When it was recorded (Unix milliseconds).
    pub recorded_ms: u64,
}

impl CorrectionRecord {
    /// Returns true if `cmd` describes exactly this correction.
    pub fn matches(&self, cmd: &CorrectEvent) -> bool {
        self.correction_id == cmd.correction_id
            && self.tenant_id == cmd.tenant_id
            && self.entity_id == cmd.entity_id
            && self.target_date == cmd.target_date
            && self.replacement_payload == cmd.replacement_payload
            && self.submission_id == cmd.submission_id
            && self.initiator_id == cmd.initiator_id
    }
}

/// A stored rescind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RescindRecord {
    /// Position in the global append order.
    pub global_pos: GlobalPos,
    /// Idempotency key.
    pub rescind_id: RescindId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The entity whose event was rescinded.
    pub entity_id: EntityId,
    /// Effective date of the rescinded event.
    pub target_date: NaiveDate,
    /// Audit metadata.
    pub payload: Payload,
    /// Caller request token.
    pub submission_id: SubmissionId,
    /// Who issued it.
    pub initiator_id: InitiatorId,
    /// When it was recorded (Unix milliseconds).
    pub recorded_ms: u64,
}

impl RescindRecord {
    /// Returns true if `cmd` describes exactly this rescind.
    pub fn matches(&self, cmd: &RescindEvent) -> bool {
        self.rescind_id == cmd.rescind_id
            && self.tenant_id == cmd.tenant_id
            && self.entity_id == cmd.entity_id
            && self.target_date == cmd.target_date
            && self.payload == cmd.payload
            && self.submission_id == cmd.submission_id
            && self.initiator_id == cmd.initiator_id
    }
}

/// One entry of an entity's raw history, as shown to audit consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditEntry {
    /// An appended event.
    Event(EventRecord),
    /// A correction of an earlier event.
    Correction(CorrectionRecord),
    /// A rescind of an earlier event.
    Rescind(RescindRecord),
}

impl AuditEntry {
    /// Position in the global append order.
    pub fn global_pos(&self) -> GlobalPos {
        match self {
            AuditEntry::Event(e) => e.global_pos,
            AuditEntry::Correction(c) => c.global_pos,
            AuditEntry::Rescind(r) => r.global_pos,
        }
    }

    /// When the entry was recorded (Unix milliseconds).
    pub fn recorded_ms(&self) -> u64 {
        match self {
            AuditEntry::Event(e) => e.recorded_ms,
            AuditEntry::Correction(c) => c.recorded_ms,
            AuditEntry::Rescind(r) => r.recorded_ms,
        }
    }
}

// =============================================================================
// Materialized Versions
// =============================================================================

/// One materialized version of an entity: its attributes over a validity
/// interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The entity.
    pub entity_id: EntityId,
    /// 1-based position in the timeline.
    pub seq_no: u32,
    /// Attributes in effect during the interval.
    pub attributes: Payload,
    /// First day of validity (inclusive).
    pub valid_from: NaiveDate,
    /// First day no longer valid (exclusive); `None` is open-ended.
    pub valid_to: Option<NaiveDate>,
}

impl Version {
    /// Returns true if `date` falls inside `[valid_from, valid_to)`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && self.valid_to.map_or(true, |end| date < end)
    }

    /// Returns true if the version has no end date.
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_id_conversions() {
        let from_str: TenantId = "t-1".into();
        let from_string: TenantId = String::from("t-1").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.to_string(), "t-1");
        assert!(EntityId::new("  ").is_blank());
    }

    #[test]
    fn test_event_type_round_trip() {
        assert_eq!("CREATE".parse::<EventType>().unwrap(), EventType::Create);
        assert_eq!(EventType::Update.as_str(), "UPDATE");
        assert!(matches!(
            "DELETE".parse::<EventType>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_entity_kind_parse() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("person".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_payload_equality_ignores_key_order() {
        let a = Payload::parse(r#"{"a":1,"b":{"y":true,"x":null}}"#).unwrap();
        let b = Payload::parse(r#"{ "b": { "x": null, "y": true }, "a": 1 }"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), r#"{"a":1,"b":{"x":null,"y":true}}"#);

        let c = Payload::parse(r#"{"a":2,"b":{"x":null,"y":true}}"#).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_payload_must_be_object() {
        assert!(matches!(
            Payload::from_value(json!([1, 2])),
            Err(Error::InvalidArgument(msg)) if msg.contains("an array")
        ));
        assert!(Payload::parse("not json").is_err());
    }

    #[test]
    fn test_submit_validation() {
        let ok = SubmitEvent::create(
            "evt-1",
            "t-1",
            EntityRef::new("asg-1", EntityKind::Assignment),
            date("2026-01-01"),
            Payload::empty(),
        );
        assert!(ok.validate().is_ok());
        assert_eq!(ok.submission_id.as_str(), "evt-1");

        let blank = SubmitEvent::create(
            "",
            "t-1",
            EntityRef::new("asg-1", EntityKind::Assignment),
            date("2026-01-01"),
            Payload::empty(),
        );
        assert!(matches!(
            blank.validate(),
            Err(Error::InvalidArgument(msg)) if msg == "event_id is required"
        ));
    }

    #[test]
    fn test_version_contains() {
        let version = Version {
            tenant_id: "t-1".into(),
            entity_id: "asg-1".into(),
            seq_no: 1,
            attributes: Payload::empty(),
            valid_from: date("2026-01-01"),
            valid_to: Some(date("2026-02-01")),
        };
        assert!(version.contains(date("2026-01-01")));
        assert!(version.contains(date("2026-01-31")));
        assert!(!version.contains(date("2026-02-01")));
        assert!(!version.contains(date("2025-12-31")));
        assert!(!version.is_open());
    }

    #[test]
    #[should_panic(expected = "GlobalPos cannot be zero")]
    fn test_global_pos_zero_panics() {
        GlobalPos::from_raw(0);
    }
}
