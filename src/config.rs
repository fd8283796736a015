//! Ledger configuration.
//!
//! A [`LedgerConfig`] can be built in code (`LedgerConfig::default()`) or
//! loaded from TOML. Every field is optional in TOML and falls back to its
//! default:
//!
//! ```toml
//! lock_timeout_ms = 5000
//! busy_timeout_ms = 5000
//! audit_default_limit = 50
//! audit_max_limit = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_audit_default_limit() -> u32 {
    50
}

const fn default_audit_max_limit() -> u32 {
    500
}

/// Tunables of a [`crate::Ledger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// How long a mutation waits for its (tenant, entity) lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// SQLite busy timeout for both connections.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Audit page size when the caller gives none.
    #[serde(default = "default_audit_default_limit")]
    pub audit_default_limit: u32,

    /// Upper clamp for caller-supplied audit page sizes.
    #[serde(default = "default_audit_max_limit")]
    pub audit_max_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            audit_default_limit: default_audit_default_limit(),
            audit_max_limit: default_audit_max_limit(),
        }
    }
}

impl LedgerConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the file cannot be read, `Error::Config` if it does not
    /// parse or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values can be used.
    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config("lock_timeout_ms must be positive".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(Error::Config("busy_timeout_ms must be positive".to_string()));
        }
        if self.audit_default_limit == 0 {
            return Err(Error::Config(
                "audit_default_limit must be positive".to_string(),
            ));
        }
        if self.audit_default_limit > self.audit_max_limit {
            return Err(Error::Config(format!(
                "audit_default_limit ({}) exceeds audit_max_limit ({})",
                self.audit_default_limit, self.audit_max_limit
            )));
        }
        Ok(())
    }

    /// Lock acquisition timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// SQLite busy timeout.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Resolves the page size of an audit query.
    ///
    /// `None` gives the default; larger values are clamped to the maximum;
    /// zero is rejected.
    pub fn audit_limit(&self, requested: Option<u32>) -> Result<u32> {
        match requested {
            None => Ok(self.audit_default_limit),
            Some(0) => Err(Error::InvalidArgument(
                "audit limit must be positive".to_string(),
            )),
            Some(n) => Ok(n.min(self.audit_max_limit)),
        }
    }
}
