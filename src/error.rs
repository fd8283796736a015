//! # Error Handling for TimelineDB
//!
//! This module defines the error type used throughout TimelineDB. A single
//! error enum ([`Error`]) represents every failure mode of the ledger, which
//! keeps signatures short and lets callers match on exactly the cases they
//! care about.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Input | `InvalidArgument` | Fix the request and resubmit |
//! | Idempotency | `ReusedIdempotencyKey` | Caller bug, surface as-is |
//! | Date conflict | `EventDateConflict` | Choose correct vs. a new date |
//! | Overlay | `EventNotFound`, `CreateCannotBeRescinded`, `AlreadyRescinded`, `AlreadyCorrected` | Precondition failed, do not retry |
//! | Replay | `InvalidEventSequence` | History cannot be explained, investigate |
//! | Isolation | `TenantMismatch`, `TenantContextMissing` | Always rejected, never retried |
//! | Contention | `LockTimeout` | Safe to retry later |
//! | Internal | `Sqlite`, `Json`, `Schema`, `Config`, `Io`, `TaskFailed` | Log and investigate |
//!
//! Nothing in the ledger retries on its own. Every error is returned to the
//! caller from inside the transaction that produced it, and that transaction
//! is rolled back.

use chrono::NaiveDate;
use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in TimelineDB operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Input Errors
    // =========================================================================

    /// A required field is missing or malformed, or the merged entity state
    /// violates one of its kind's rules.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Idempotency and Uniqueness
    // =========================================================================

    /// An idempotency key (event, correction or rescind id, or a submission
    /// token) was reused with different content.
    ///
    /// # When This Happens
    ///
    /// The first submission with a key is stored. A later submission with the
    /// same key and identical content is a no-op that returns the stored
    /// record. Anything else lands here: the stored record is left untouched.
    #[error("idempotency key '{key}' was reused with different content")]
    ReusedIdempotencyKey {
        /// The key that was reused.
        key: String,
    },

    /// Two distinct events target the same effective date of one entity.
    ///
    /// # Recovery
    ///
    /// The caller must either correct the existing event or submit the new
    /// fact on a different date.
    #[error("entity '{entity_id}' already has a different event on {effective_date}")]
    EventDateConflict {
        /// The entity that already has an event on that date.
        entity_id: String,
        /// The contested effective date.
        effective_date: NaiveDate,
    },

    // =========================================================================
    // Overlay Preconditions
    // =========================================================================

    /// A correction or rescind targets a date with no event.
    #[error("entity '{entity_id}' has no event on {effective_date}")]
    EventNotFound {
        /// The targeted entity.
        entity_id: String,
        /// The targeted effective date.
        effective_date: NaiveDate,
    },

    /// The foundational CREATE event of an entity cannot be rescinded.
    #[error("the CREATE event of entity '{entity_id}' on {effective_date} cannot be rescinded")]
    CreateCannotBeRescinded {
        /// The targeted entity.
        entity_id: String,
        /// The date of its CREATE event.
        effective_date: NaiveDate,
    },

    /// The targeted date has already been rescinded.
    #[error("the event of entity '{entity_id}' on {effective_date} is already rescinded")]
    AlreadyRescinded {
        /// The targeted entity.
        entity_id: String,
        /// The rescinded date.
        effective_date: NaiveDate,
    },

    /// The targeted date already carries a different correction.
    #[error("the event of entity '{entity_id}' on {effective_date} is already corrected")]
    AlreadyCorrected {
        /// The targeted entity.
        entity_id: String,
        /// The corrected date.
        effective_date: NaiveDate,
    },

    // =========================================================================
    // Replay
    // =========================================================================

    /// Replay found a history it cannot explain (UPDATE before CREATE, a
    /// second CREATE, mixed entity kinds).
    ///
    /// Submit normally prevents this from being committed, so seeing it on a
    /// rebuild indicates a bug or out-of-band tampering.
    #[error("invalid event sequence for entity '{entity_id}': {reason}")]
    InvalidEventSequence {
        /// The entity whose history failed to replay.
        entity_id: String,
        /// What was wrong with the history.
        reason: String,
    },

    // =========================================================================
    // Tenant Isolation
    // =========================================================================

    /// The operation was issued without a tenant in its request context.
    #[error("no tenant context set for this operation")]
    TenantContextMissing,

    /// The request context's tenant differs from the tenant being addressed.
    #[error("tenant context '{context}' does not match requested tenant '{requested}'")]
    TenantMismatch {
        /// The tenant carried by the request context.
        context: String,
        /// The tenant the operation tried to address.
        requested: String,
    },

    // =========================================================================
    // Reads and Contention
    // =========================================================================

    /// The requested entity or version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The per-entity lock could not be acquired in time.
    #[error("timed out after {waited_ms}ms waiting for the lock on '{key}'")]
    LockTimeout {
        /// The (tenant, entity) lock key.
        key: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A payload could not be parsed or encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch or stored data that cannot be decoded.
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O failure (reading a config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task of the async handle panicked or was cancelled.
    #[error("ledger task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    /// Returns true when repeating the same call later may succeed.
    ///
    /// Only lock contention qualifies: a timed-out per-entity lock, or SQLite
    /// reporting the database busy or locked. Every other variant describes
    /// the request itself or the committed history, so a retry would fail
    /// the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LockTimeout { .. } => true,
            Error::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_error_display() {
        let conflict = Error::EventDateConflict {
            entity_id: "asg-1".to_string(),
            effective_date: date("2026-01-01"),
        };
        assert_eq!(
            conflict.to_string(),
            "entity 'asg-1' already has a different event on 2026-01-01"
        );

        let reused = Error::ReusedIdempotencyKey {
            key: "evt-9".to_string(),
        };
        assert_eq!(
            reused.to_string(),
            "idempotency key 'evt-9' was reused with different content"
        );

        let mismatch = Error::TenantMismatch {
            context: "t-a".to_string(),
            requested: "t-b".to_string(),
        };
        assert_eq!(
            mismatch.to_string(),
            "tenant context 't-a' does not match requested tenant 't-b'"
        );
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();

        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = Error::LockTimeout {
            key: "t-a/asg-1".to_string(),
            waited_ms: 10,
        };
        assert!(timeout.is_retryable());

        let busy = Error::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());

        assert!(!Error::TenantContextMissing.is_retryable());
        assert!(!Error::ReusedIdempotencyKey { key: "k".into() }.is_retryable());
    }
}
