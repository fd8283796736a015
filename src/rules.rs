//! Entity kind rules.
//!
//! Every kind runs through the same replay machinery. What differs is the
//! set of attributes its CREATE must carry and the constraints its merged
//! state must satisfy after every event. Both live in one static table per
//! kind:
//!
//! | Kind | CREATE requires | State constraints |
//! |------|-----------------|-------------------|
//! | `assignment` | `position_id` | `status` in {active, inactive, leave}; `fte` in (0, 1] |
//! | `org_unit` | `name` | `status` in {active, disabled}; `is_business_unit` boolean |
//! | `payroll_run` | `pay_period_id` | `state` in {draft, calculating, calculated, finalized}; `run_number` integer >= 1 |
//! | `holiday_calendar` | `country_code` | `day_class` in {workday, legal_holiday, rest_day}; `country_code` two uppercase letters |
//! | `time_profile` | `name` | `status` in {active, disabled}; `shift_hours` in (0, 24] |
//!
//! Required attributes must stay present in every later state. Constrained
//! attributes are checked whenever present. Numeric attributes accept a JSON
//! number or a string holding one.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::EntityKind;

/// A constraint on one attribute of an entity's state.
#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// String drawn from a fixed set.
    OneOf(&'static [&'static str]),
    /// Number with `min < value <= max`.
    NumberInRange {
        /// Exclusive lower bound.
        min_exclusive: f64,
        /// Inclusive upper bound.
        max_inclusive: f64,
    },
    /// Integer with `value >= min`.
    IntegerAtLeast(i64),
    /// JSON boolean.
    Boolean,
    /// Two ASCII uppercase letters.
    CountryCode,
}

/// The rules of one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct KindRules {
    /// Attributes a CREATE must carry, non-null, and every state keeps.
    pub required: &'static [&'static str],
    /// Constraints on attributes when present.
    pub fields: &'static [(&'static str, FieldRule)],
}

const ASSIGNMENT: KindRules = KindRules {
    required: &["position_id"],
    fields: &[
        ("status", FieldRule::OneOf(&["active", "inactive", "leave"])),
        (
            "fte",
            FieldRule::NumberInRange {
                min_exclusive: 0.0,
                max_inclusive: 1.0,
            },
        ),
    ],
};

const ORG_UNIT: KindRules = KindRules {
    required: &["name"],
    fields: &[
        ("status", FieldRule::OneOf(&["active", "disabled"])),
        ("is_business_unit", FieldRule::Boolean),
    ],
};

const PAYROLL_RUN: KindRules = KindRules {
    required: &["pay_period_id"],
    fields: &[
        (
            "state",
            FieldRule::OneOf(&["draft", "calculating", "calculated", "finalized"]),
        ),
        ("run_number", FieldRule::IntegerAtLeast(1)),
    ],
};

const HOLIDAY_CALENDAR: KindRules = KindRules {
    required: &["country_code"],
    fields: &[
        (
            "day_class",
            FieldRule::OneOf(&["workday", "legal_holiday", "rest_day"]),
        ),
        ("country_code", FieldRule::CountryCode),
    ],
};

const TIME_PROFILE: KindRules = KindRules {
    required: &["name"],
    fields: &[
        ("status", FieldRule::OneOf(&["active", "disabled"])),
        (
            "shift_hours",
            FieldRule::NumberInRange {
                min_exclusive: 0.0,
                max_inclusive: 24.0,
            },
        ),
    ],
};

impl KindRules {
    /// Returns the rules for `kind`.
    pub fn for_kind(kind: EntityKind) -> &'static KindRules {
        match kind {
            EntityKind::Assignment => &ASSIGNMENT,
            EntityKind::OrgUnit => &ORG_UNIT,
            EntityKind::PayrollRun => &PAYROLL_RUN,
            EntityKind::HolidayCalendar => &HOLIDAY_CALENDAR,
            EntityKind::TimeProfile => &TIME_PROFILE,
        }
    }

    /// Checks a merged state.
    ///
    /// # Errors
    ///
    /// `Error::InvalidArgument` naming the first attribute that is missing or
    /// violates its constraint.
    pub fn validate(&self, kind: EntityKind, state: &Map<String, Value>) -> Result<()> {
        for name in self.required {
            match state.get(*name) {
                None | Some(Value::Null) => {
                    return Err(Error::InvalidArgument(format!(
                        "{kind} requires attribute '{name}'"
                    )));
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(Error::InvalidArgument(format!(
                        "{kind} attribute '{name}' must not be empty"
                    )));
                }
                Some(_) => {}
            }
        }

        for (name, rule) in self.fields {
            if let Some(value) = state.get(*name) {
                check_field(kind, name, *rule, value)?;
            }
        }
        Ok(())
    }
}

fn check_field(kind: EntityKind, name: &str, rule: FieldRule, value: &Value) -> Result<()> {
    let ok = match rule {
        FieldRule::OneOf(allowed) => value.as_str().is_some_and(|s| allowed.contains(&s)),
        FieldRule::NumberInRange {
            min_exclusive,
            max_inclusive,
        } => as_number(value).is_some_and(|n| n > min_exclusive && n <= max_inclusive),
        FieldRule::IntegerAtLeast(min) => as_integer(value).is_some_and(|n| n >= min),
        FieldRule::Boolean => value.is_boolean(),
        FieldRule::CountryCode => value
            .as_str()
            .is_some_and(|s| s.len() == 2 && s.bytes().all(|b| b.is_ascii_uppercase())),
    };

    if ok {
        return Ok(());
    }
    Err(Error::InvalidArgument(format!(
        "{kind} attribute '{name}' has invalid value {value} (expected {})",
        describe(rule)
    )))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn describe(rule: FieldRule) -> String {
    match rule {
        FieldRule::OneOf(allowed) => format!("one of {}", allowed.join(", ")),
        FieldRule::NumberInRange {
            min_exclusive,
            max_inclusive,
        } => format!("a number in ({min_exclusive}, {max_inclusive}]"),
        FieldRule::IntegerAtLeast(min) => format!("an integer >= {min}"),
        FieldRule::Boolean => "a boolean".to_string(),
        FieldRule::CountryCode => "two uppercase letters".to_string(),
    }
}
