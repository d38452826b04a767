//! File content transfer against the back end's two-phase protocol
//!
//! Downloads and uploads are initiated as an RPC that returns a list of
//! transfer endpoints; the bulk bytes then flow over a plain HTTP request to
//! the selected endpoint. Bodies are streamed end to end, never buffered
//! whole, and an upload is only finalized by a successful initiate+transfer
//! pair, so a cancelled request never commits partial content.

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::WopiContext;
use crate::error::WopiError;
use crate::storage::{
    select_transfer_endpoint, FileLock, StorageGateway, UploadRequest,
};

/// Header carrying the per-transfer bearer token returned by the initiate
/// call.
pub const TRANSFER_TOKEN_HEADER: &str = "X-Transfer-Token";
/// Header carrying the storage access credential.
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
/// Header forwarding the WOPI lock id on uploads.
pub const LOCK_ID_HEADER: &str = "X-Lock-Id";

/// Streamed file content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, WopiError>> + Send>>;

pub struct ContentTransfer<S> {
    gateway: Arc<S>,
    http: reqwest::Client,
}

impl<S: StorageGateway> ContentTransfer<S> {
    pub fn new(gateway: Arc<S>) -> Result<Self, WopiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WopiError::Internal(e.to_string()))?;
        Ok(ContentTransfer { gateway, http })
    }

    /// Stream the current content of the file behind `ctx`.
    ///
    /// In view-only mode the alternate view-only credential is presented to
    /// the transfer endpoint.
    pub async fn get_file(&self, ctx: &WopiContext) -> Result<ByteStream, WopiError> {
        let endpoints = self
            .gateway
            .initiate_download(&ctx.storage_access_token, &ctx.file_reference)
            .await?;

        let endpoint = select_transfer_endpoint(&endpoints).ok_or_else(|| {
            warn!(file = %ctx.file_reference.opaque_id, op = "GetFile",
                  "no supported transfer protocol offered");
            WopiError::Internal("no supported transfer protocol".to_string())
        })?;

        let response = self
            .http
            .get(&endpoint.endpoint)
            .header(TRANSFER_TOKEN_HEADER, &endpoint.token)
            .header(ACCESS_TOKEN_HEADER, ctx.download_token())
            .send()
            .await
            .map_err(|e| {
                warn!(file = %ctx.file_reference.opaque_id, op = "GetFile", error = %e,
                      "transfer request failed");
                WopiError::Internal("download transfer failed".to_string())
            })?;

        if response.status() != reqwest::StatusCode::OK {
            warn!(file = %ctx.file_reference.opaque_id, op = "GetFile",
                  status = %response.status(), "transfer endpoint rejected download");
            return Err(WopiError::Internal("download transfer failed".to_string()));
        }

        Ok(Box::pin(response.bytes_stream().map_err(|e| {
            WopiError::Internal(format!("download stream interrupted: {e}"))
        })))
    }

    /// Replace the content of the file behind `ctx` with `source`.
    ///
    /// The write is gated on the lock state read back from a fresh stat, and
    /// the upload initiation carries an If-Match precondition on the current
    /// revision tag so a concurrent writer outside this flow cannot be
    /// silently overwritten. Returns the revision tag after the write when
    /// it can be read back.
    pub async fn put_file(
        &self,
        ctx: &WopiContext,
        source: reqwest::Body,
        source_length: u64,
        lock_id: &str,
    ) -> Result<String, WopiError> {
        let token = &ctx.storage_access_token;
        let stat = self.gateway.stat(token, &ctx.file_reference).await?;

        check_put_preconditions(stat.lock.as_ref(), lock_id, stat.size)?;

        let request = UploadRequest {
            lock_id: lock_id.to_string(),
            if_match_etag: stat.etag.clone(),
            upload_length: source_length,
        };
        let endpoints = self
            .gateway
            .initiate_upload(token, &ctx.file_reference, &request)
            .await?;

        // A zero-length write is completed by the initiate call alone.
        if source_length > 0 {
            let endpoint = select_transfer_endpoint(&endpoints).ok_or_else(|| {
                warn!(file = %ctx.file_reference.opaque_id, op = "PutFile",
                      "no supported transfer protocol offered");
                WopiError::Internal("no supported transfer protocol".to_string())
            })?;

            let mut transfer = self
                .http
                .put(&endpoint.endpoint)
                .header(reqwest::header::CONTENT_LENGTH, source_length)
                .header(TRANSFER_TOKEN_HEADER, &endpoint.token)
                .header(ACCESS_TOKEN_HEADER, token);
            if !lock_id.is_empty() {
                transfer = transfer.header(LOCK_ID_HEADER, lock_id);
            }

            let response = transfer.body(source).send().await.map_err(|e| {
                warn!(file = %ctx.file_reference.opaque_id, op = "PutFile", error = %e,
                      "transfer request failed");
                WopiError::Internal("upload transfer failed".to_string())
            })?;

            if response.status() != reqwest::StatusCode::OK {
                warn!(file = %ctx.file_reference.opaque_id, op = "PutFile",
                      status = %response.status(), "transfer endpoint rejected upload");
                return Err(WopiError::Internal("upload transfer failed".to_string()));
            }
        }

        // Best-effort read-back of the new revision tag for X-WOPI-ItemVersion.
        match self.gateway.stat(token, &ctx.file_reference).await {
            Ok(after) => Ok(after.etag),
            Err(err) => {
                debug!(file = %ctx.file_reference.opaque_id, op = "PutFile", %err,
                       "post-write stat failed, omitting item version");
                Ok(String::new())
            }
        }
    }
}

/// The lock gate in front of every write.
///
/// A held lock must match the caller's id exactly. An unlocked file may only
/// be written without a lock while it is still empty; anything non-empty
/// must be locked first.
fn check_put_preconditions(
    current: Option<&FileLock>,
    lock_id: &str,
    size: u64,
) -> Result<(), WopiError> {
    match current {
        Some(held) if held.lock_id != lock_id => Err(WopiError::conflict(held.lock_id.clone())),
        None if lock_id.is_empty() && size > 0 => Err(WopiError::conflict("")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(lock_id: &str) -> FileLock {
        FileLock {
            lock_id: lock_id.to_string(),
            app_name: "test-app".to_string(),
            expiration: 0,
        }
    }

    #[test]
    fn test_put_requires_matching_lock() {
        let lock = held("L1");
        assert!(check_put_preconditions(Some(&lock), "L1", 10).is_ok());

        let err = check_put_preconditions(Some(&lock), "L2", 10).unwrap_err();
        match err {
            WopiError::Conflict { lock_id } => assert_eq!(lock_id, "L1"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_unlocked_empty_file_may_be_written_once() {
        assert!(check_put_preconditions(None, "", 0).is_ok());
    }

    #[test]
    fn test_unlocked_nonempty_file_must_be_locked() {
        let err = check_put_preconditions(None, "", 42).unwrap_err();
        match err {
            WopiError::Conflict { lock_id } => assert_eq!(lock_id, ""),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
