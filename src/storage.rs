//! Storage back-end contract
//!
//! The gateway is an opaque remote service; this module pins down the
//! request/response shapes the WOPI connector depends on. Correctness under
//! concurrent clients is delegated entirely to the back end's
//! compare-and-swap semantics on locks and on the file revision tag, so the
//! trait below is deliberately free of any local caching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::FileReference;

/// Status classes consumed from the back end. Anything the back end reports
/// outside this set is carried as [`GatewayCode::Other`] and treated as an
/// opaque internal error by the callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayCode {
    NotFound,
    FailedPrecondition,
    Aborted,
    Locked,
    Other,
}

#[derive(Debug, Error)]
#[error("gateway {code:?}: {message}")]
pub struct GatewayError {
    pub code: GatewayCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: GatewayCode, message: impl Into<String>) -> Self {
        GatewayError {
            code,
            message: message.into(),
        }
    }

    /// True when the back end rejected a lock compare-and-swap. The only
    /// valid reaction is a fresh re-query, never a retry on cached state.
    pub fn is_lock_mismatch(&self) -> bool {
        matches!(
            self.code,
            GatewayCode::FailedPrecondition | GatewayCode::Aborted
        )
    }
}

/// Advisory lock as held by the back end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    #[serde(rename = "lockId")]
    pub lock_id: String,
    /// Name of the application holding the lock
    #[serde(rename = "appName")]
    pub app_name: String,
    /// Unix seconds at which the lock expires
    pub expiration: i64,
}

/// Result of a stat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<FileLock>,
    pub size: u64,
    /// Revision tag used as the If-Match precondition on uploads
    pub etag: String,
    /// Modification time, unix seconds
    pub mtime: i64,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
}

/// One entry of the transfer-protocol list returned by the two-phase
/// upload/download initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEndpoint {
    pub protocol: String,
    pub endpoint: String,
    /// Opaque bearer token for the bulk-transfer request
    pub token: String,
}

/// Parameters of an upload initiation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Lock id forwarded to the back end, empty for unlocked uploads
    #[serde(rename = "lockId", default, skip_serializing_if = "String::is_empty")]
    pub lock_id: String,
    /// If-Match precondition on the current revision tag
    #[serde(rename = "ifMatchEtag", default, skip_serializing_if = "String::is_empty")]
    pub if_match_etag: String,
    /// Exact length of the content about to be transferred
    #[serde(rename = "uploadLength")]
    pub upload_length: u64,
}

/// The advisory-lock and transfer RPC surface of the storage back end.
///
/// Implementations are injected as a shared, thread-safe handle
/// (`Arc<impl StorageGateway>`) into every component at construction;
/// there is no ambient/global client state.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn stat(&self, token: &str, file: &FileReference) -> Result<StatInfo, GatewayError>;

    async fn get_lock(
        &self,
        token: &str,
        file: &FileReference,
    ) -> Result<Option<FileLock>, GatewayError>;

    /// Set a lock on an unlocked file; fails if a different lock exists.
    async fn set_lock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError>;

    /// Refresh a lock, optionally replacing `existing_id` with `lock.lock_id`
    /// (the unlock-and-relock operation). Fails unless the current lock
    /// matches `existing_id` when given, or `lock.lock_id` otherwise.
    async fn refresh_lock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
        existing_id: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn unlock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError>;

    async fn initiate_download(
        &self,
        token: &str,
        file: &FileReference,
    ) -> Result<Vec<TransferEndpoint>, GatewayError>;

    async fn initiate_upload(
        &self,
        token: &str,
        file: &FileReference,
        request: &UploadRequest,
    ) -> Result<Vec<TransferEndpoint>, GatewayError>;
}

/// Transfer protocols this connector can speak for bulk content.
pub const SUPPORTED_TRANSFER_PROTOCOLS: [&str; 2] = ["simple", "spaces"];

/// Pick the first endpoint carrying a protocol the connector supports.
pub fn select_transfer_endpoint(endpoints: &[TransferEndpoint]) -> Option<&TransferEndpoint> {
    endpoints
        .iter()
        .find(|ep| SUPPORTED_TRANSFER_PROTOCOLS.contains(&ep.protocol.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_transfer_endpoint() {
        let endpoints = vec![
            TransferEndpoint {
                protocol: "tus".to_string(),
                endpoint: "https://data.example.org/tus".to_string(),
                token: "t1".to_string(),
            },
            TransferEndpoint {
                protocol: "spaces".to_string(),
                endpoint: "https://data.example.org/spaces".to_string(),
                token: "t2".to_string(),
            },
        ];
        let selected = select_transfer_endpoint(&endpoints).unwrap();
        assert_eq!(selected.protocol, "spaces");
        assert_eq!(selected.token, "t2");
    }

    #[test]
    fn test_select_transfer_endpoint_none_supported() {
        let endpoints = vec![TransferEndpoint {
            protocol: "tus".to_string(),
            endpoint: "https://data.example.org/tus".to_string(),
            token: "t1".to_string(),
        }];
        assert!(select_transfer_endpoint(&endpoints).is_none());
    }

    #[test]
    fn test_lock_mismatch_predicate() {
        assert!(GatewayError::new(GatewayCode::Aborted, "").is_lock_mismatch());
        assert!(GatewayError::new(GatewayCode::FailedPrecondition, "").is_lock_mismatch());
        assert!(!GatewayError::new(GatewayCode::Locked, "").is_lock_mismatch());
        assert!(!GatewayError::new(GatewayCode::NotFound, "").is_lock_mismatch());
    }
}
