//! Identity verification for `authenticate` messages.
//!
//! Token issuance lives outside this service; the hub only needs to turn a
//! client-supplied identity into a user id it can bind to a connection.

use crate::error::{HubError, HubResult};

/// Longest identity accepted by [`OpaqueIdentity`].
pub const MAX_IDENTITY_LEN: usize = 256;

pub trait IdentityVerifier: Send + Sync {
    /// Resolve the client-supplied identity to a user id.
    fn verify(&self, identity: Option<&str>) -> HubResult<String>;
}

/// Accepts any well-formed opaque identity as the user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueIdentity;

impl IdentityVerifier for OpaqueIdentity {
    fn verify(&self, identity: Option<&str>) -> HubResult<String> {
        let identity = identity
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HubError::AuthFailure("missing identity".to_string()))?;

        if identity.len() > MAX_IDENTITY_LEN {
            return Err(HubError::AuthFailure(format!(
                "identity longer than {MAX_IDENTITY_LEN} bytes"
            )));
        }
        if identity
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(HubError::AuthFailure(
                "identity contains whitespace or control characters".to_string(),
            ));
        }
        Ok(identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_identity() {
        let verifier = OpaqueIdentity;
        assert_eq!(verifier.verify(Some(" user-1 ")).unwrap(), "user-1");

        for bad in [None, Some(""), Some("   "), Some("a b"), Some("a\u{7}")] {
            assert!(matches!(
                verifier.verify(bad),
                Err(HubError::AuthFailure(_))
            ));
        }

        let long = "x".repeat(MAX_IDENTITY_LEN + 1);
        assert!(verifier.verify(Some(&long)).is_err());
    }
}
