//! Unified error type for the WOPI host public API
//!
//! Internal modules maintain their domain-specific errors for precise handling.
//! This unified type is what the protocol adapter translates into wire-level
//! WOPI responses; nothing below the adapter knows about HTTP status codes.

use thiserror::Error;

/// Unified error taxonomy for all WOPI host operations
///
/// # Error Categories
///
/// - **BadRequest**: caller protocol violation (e.g. a lock operation with an
///   empty lock id)
/// - **NotFound**: the file reference is unknown to the storage back end
/// - **Conflict**: lock or version mismatch; carries the authoritative
///   current lock id when the back end reported one
/// - **Unauthorized**: session-token or proof-key verification failure
/// - **Internal**: everything else, including back-end transport errors and
///   malformed discovery documents
#[derive(Debug, Error)]
pub enum WopiError {
    /// Caller protocol violation
    #[error("bad request: {0}")]
    BadRequest(String),

    /// File reference unknown to the storage back end
    #[error("file not found")]
    NotFound,

    /// Lock or version mismatch; `lock_id` is the lock actually in place
    /// (empty when the file is unlocked)
    #[error("lock conflict, current lock is {lock_id:?}")]
    Conflict { lock_id: String },

    /// Session-token or proof-key verification failure
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Opaque internal failure; details are logged, never exposed on the wire
    #[error("internal error: {0}")]
    Internal(String),
}

impl WopiError {
    /// Conflict against the given authoritative lock id
    pub fn conflict(lock_id: impl Into<String>) -> Self {
        WopiError::Conflict {
            lock_id: lock_id.into(),
        }
    }

    /// Returns true if the caller may retry with corrected lock state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if this error must short-circuit before any
    /// side-effecting lock or content operation
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<crate::crypto::CryptoError> for WopiError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        WopiError::Unauthorized(err.to_string())
    }
}

impl From<crate::token::AuthError> for WopiError {
    fn from(err: crate::token::AuthError) -> Self {
        WopiError::Unauthorized(err.to_string())
    }
}

impl From<crate::token::EntryUrlError> for WopiError {
    fn from(err: crate::token::EntryUrlError) -> Self {
        WopiError::Internal(err.to_string())
    }
}

impl From<crate::proofkey::VerificationError> for WopiError {
    fn from(err: crate::proofkey::VerificationError) -> Self {
        match err {
            crate::proofkey::VerificationError::Discovery(msg) => WopiError::Internal(msg),
            other => WopiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<crate::fileinfo::FileInfoError> for WopiError {
    fn from(err: crate::fileinfo::FileInfoError) -> Self {
        WopiError::Internal(err.to_string())
    }
}

impl From<crate::storage::GatewayError> for WopiError {
    fn from(err: crate::storage::GatewayError) -> Self {
        use crate::storage::GatewayCode;
        match err.code {
            GatewayCode::NotFound => WopiError::NotFound,
            _ => WopiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_carries_lock_id() {
        let err = WopiError::conflict("lock-1");
        assert!(err.is_conflict());
        match err {
            WopiError::Conflict { lock_id } => assert_eq!(lock_id, "lock-1"),
            _ => panic!("expected conflict"),
        }
    }

    #[test]
    fn test_gateway_not_found_maps_to_not_found() {
        let gw =
            crate::storage::GatewayError::new(crate::storage::GatewayCode::NotFound, "no such file");
        assert!(matches!(WopiError::from(gw), WopiError::NotFound));
    }

    #[test]
    fn test_gateway_other_maps_to_internal() {
        let gw =
            crate::storage::GatewayError::new(crate::storage::GatewayCode::Other, "transport closed");
        assert!(matches!(WopiError::from(gw), WopiError::Internal(_)));
    }
}
