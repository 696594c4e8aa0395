use std::sync::Arc;

use async_trait::async_trait;
use s3gate_common::{AccessDecision, AccessGrant, AccessTarget, Result, S3GateError};

/// Resolves a key id against a target. Implemented by storage backends.
///
/// Rules expected from implementations:
/// - known key id with rights on the target: `Granted` carrying the key's secret;
/// - known key id without rights: `Denied`;
/// - unknown key id: `UnknownIdentity`;
/// - no key id and a public target: `Granted` with no identity;
/// - no key id and a private (or absent) target: `Denied`.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    async fn resolve_access(
        &self,
        key_id: Option<&str>,
        target: &AccessTarget,
    ) -> Result<AccessDecision>;
}

#[async_trait]
impl AccessResolver for Arc<dyn AccessResolver> {
    async fn resolve_access(
        &self,
        key_id: Option<&str>,
        target: &AccessTarget,
    ) -> Result<AccessDecision> {
        self.as_ref().resolve_access(key_id, target).await
    }
}

/// Applies an access decision: only `Granted` lets the request continue.
pub fn enforce(decision: AccessDecision) -> Result<AccessGrant> {
    match decision {
        AccessDecision::Granted(grant) => Ok(grant),
        AccessDecision::Denied => Err(S3GateError::AccessDenied),
        AccessDecision::UnknownIdentity => Err(S3GateError::InvalidIdentity),
    }
}
