//! Tenant isolation.
//!
//! Every ledger operation takes a [`RequestContext`] naming the tenant the
//! caller is acting for. The check is fail-closed: a context without a
//! tenant is rejected, and a context whose tenant differs from the tenant
//! named in the request is rejected. Neither case reads any data.
//!
//! The context is an explicit argument, never ambient state, so two threads
//! serving different tenants cannot observe each other's scope.

use crate::error::{Error, Result};
use crate::types::{InitiatorId, TenantId};

/// The caller's identity for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant: Option<TenantId>,
    initiator: Option<InitiatorId>,
}

impl RequestContext {
    /// A context acting for `tenant`.
    pub fn for_tenant(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            initiator: None,
        }
    }

    /// A context with no tenant. Every data operation rejects it.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Attaches the acting principal (builder pattern).
    pub fn with_initiator(mut self, initiator: impl Into<InitiatorId>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    /// The tenant, if any.
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// The acting principal, if any.
    pub fn initiator(&self) -> Option<&InitiatorId> {
        self.initiator.as_ref()
    }

    /// Returns the context tenant, or `TenantContextMissing`.
    pub fn require_tenant(&self) -> Result<&TenantId> {
        self.tenant.as_ref().ok_or(Error::TenantContextMissing)
    }

    /// Checks that this context may address `requested`.
    ///
    /// # Errors
    ///
    /// - `TenantContextMissing` when the context carries no tenant
    /// - `TenantMismatch` when it carries a different one
    pub fn authorize(&self, requested: &TenantId) -> Result<()> {
        let tenant = self.require_tenant()?;
        if tenant != requested {
            return Err(Error::TenantMismatch {
                context: tenant.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_tenant_is_authorized() {
        let ctx = RequestContext::for_tenant("t-a").with_initiator("u-1");
        assert!(ctx.authorize(&TenantId::new("t-a")).is_ok());
        assert_eq!(ctx.initiator().map(|i| i.as_str()), Some("u-1"));
    }

    #[test]
    fn test_missing_context_fails_closed() {
        let err = RequestContext::anonymous()
            .authorize(&TenantId::new("t-a"))
            .unwrap_err();
        assert!(matches!(err, Error::TenantContextMissing));
    }

    #[test]
    fn test_mismatch_fails_closed() {
        let err = RequestContext::for_tenant("t-a")
            .authorize(&TenantId::new("t-b"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TenantMismatch { context, requested } if context == "t-a" && requested == "t-b"
        ));
    }
}
