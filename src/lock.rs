//! WOPI lock lifecycle against the storage back end's advisory-lock RPCs
//!
//! Every operation is a small per-request state machine recomputed from
//! back-end responses; no lock state is cached locally. Whenever the back
//! end's compare-and-swap rejects an operation, the only source of truth
//! for the conflicting value is a fresh read, never a value remembered from
//! an earlier step. Acting on a stale lock id under concurrent access is
//! exactly the failure mode WOPI clients cannot recover from.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::context::WopiContext;
use crate::error::WopiError;
use crate::storage::{FileLock, GatewayCode, StorageGateway};

/// Lock lifetime mandated by the WOPI protocol: every lock and refresh
/// pushes the expiration 30 minutes forward.
pub const WOPI_LOCK_DURATION: Duration = Duration::from_secs(30 * 60);

pub struct LockManager<S> {
    gateway: Arc<S>,
    /// Name reported to the back end as the lock owner
    app_name: String,
}

impl<S: StorageGateway> LockManager<S> {
    pub fn new(gateway: Arc<S>, app_name: impl Into<String>) -> Self {
        LockManager {
            gateway,
            app_name: app_name.into(),
        }
    }

    fn wopi_lock(&self, lock_id: &str) -> FileLock {
        FileLock {
            lock_id: lock_id.to_string(),
            app_name: self.app_name.clone(),
            expiration: Utc::now().timestamp() + WOPI_LOCK_DURATION.as_secs() as i64,
        }
    }

    /// Read the current lock id from the back end, empty when unlocked.
    pub async fn get_lock(&self, ctx: &WopiContext) -> Result<String, WopiError> {
        let token = &ctx.storage_access_token;
        match self.gateway.get_lock(token, &ctx.file_reference).await {
            Ok(Some(lock)) => Ok(lock.lock_id),
            Ok(None) => Ok(String::new()),
            Err(err) if err.code == GatewayCode::NotFound => Err(WopiError::NotFound),
            Err(err) => {
                warn!(file = %ctx.file_reference.opaque_id, op = "GetLock", %err,
                      "gateway lock query failed");
                Err(WopiError::Internal("lock query failed".to_string()))
            }
        }
    }

    /// Acquire `new_id`, or replace `old_id` with `new_id` when `old_id` is
    /// given (the WOPI UnlockAndRelock operation).
    ///
    /// A rejected compare-and-swap is re-resolved with a fresh read: when
    /// the current lock already equals `new_id` the mismatch was transient
    /// (a concurrent retry applied it first) and the call is a success;
    /// otherwise the authoritative id is surfaced as a conflict.
    pub async fn lock(
        &self,
        ctx: &WopiContext,
        new_id: &str,
        old_id: &str,
    ) -> Result<(), WopiError> {
        if new_id.is_empty() {
            return Err(WopiError::BadRequest("missing X-WOPI-Lock".to_string()));
        }

        let token = &ctx.storage_access_token;
        let lock = self.wopi_lock(new_id);
        let result = if old_id.is_empty() {
            self.gateway.set_lock(token, &ctx.file_reference, &lock).await
        } else {
            self.gateway
                .refresh_lock(token, &ctx.file_reference, &lock, Some(old_id))
                .await
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_lock_mismatch() => {
                match self.gateway.get_lock(token, &ctx.file_reference).await {
                    Ok(Some(current)) if current.lock_id == new_id => Ok(()),
                    Ok(Some(current)) => Err(WopiError::conflict(current.lock_id)),
                    // TODO(lock): consider an explicit refresh here when the
                    // transient-success branch fires, so the expiration is
                    // pushed forward as well.
                    Ok(None) => {
                        warn!(file = %ctx.file_reference.opaque_id, op = "Lock",
                              "set rejected but no lock present");
                        Err(WopiError::Internal("inconsistent lock state".to_string()))
                    }
                    Err(requery) => {
                        warn!(file = %ctx.file_reference.opaque_id, op = "Lock", %requery,
                              "conflict re-query failed");
                        Err(WopiError::Internal("lock re-query failed".to_string()))
                    }
                }
            }
            Err(err) if err.code == GatewayCode::NotFound => Err(WopiError::NotFound),
            Err(err) => {
                warn!(file = %ctx.file_reference.opaque_id, op = "Lock", %err,
                      "gateway lock failed");
                Err(WopiError::Internal("lock failed".to_string()))
            }
        }
    }

    /// Push the expiration of `id` thirty minutes forward.
    pub async fn refresh_lock(&self, ctx: &WopiContext, id: &str) -> Result<(), WopiError> {
        if id.is_empty() {
            return Err(WopiError::BadRequest("missing X-WOPI-Lock".to_string()));
        }

        let token = &ctx.storage_access_token;
        let lock = self.wopi_lock(id);
        match self
            .gateway
            .refresh_lock(token, &ctx.file_reference, &lock, None)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_lock_mismatch() => {
                match self.gateway.get_lock(token, &ctx.file_reference).await {
                    Ok(None) => Err(WopiError::conflict("")),
                    Ok(Some(current)) => Err(WopiError::conflict(current.lock_id)),
                    Err(requery) => {
                        warn!(file = %ctx.file_reference.opaque_id, op = "RefreshLock", %requery,
                              "conflict re-query failed");
                        Err(WopiError::Internal("lock re-query failed".to_string()))
                    }
                }
            }
            Err(err) if err.code == GatewayCode::NotFound => Err(WopiError::NotFound),
            Err(err) => {
                warn!(file = %ctx.file_reference.opaque_id, op = "RefreshLock", %err,
                      "gateway refresh failed");
                Err(WopiError::Internal("refresh failed".to_string()))
            }
        }
    }

    /// Release `id`.
    ///
    /// Unlocking an already-unlocked file is a conflict with an empty
    /// authoritative id; unlocking against someone else's lock surfaces the
    /// freshly re-queried holder.
    pub async fn unlock(&self, ctx: &WopiContext, id: &str) -> Result<(), WopiError> {
        if id.is_empty() {
            return Err(WopiError::BadRequest("missing X-WOPI-Lock".to_string()));
        }

        let token = &ctx.storage_access_token;
        let lock = self.wopi_lock(id);
        match self.gateway.unlock(token, &ctx.file_reference, &lock).await {
            Ok(()) => Ok(()),
            Err(err) if err.code == GatewayCode::Aborted => Err(WopiError::conflict("")),
            Err(err) if err.code == GatewayCode::Locked => {
                match self.gateway.get_lock(token, &ctx.file_reference).await {
                    Ok(Some(current)) => Err(WopiError::conflict(current.lock_id)),
                    Ok(None) => Err(WopiError::conflict("")),
                    Err(requery) => {
                        warn!(file = %ctx.file_reference.opaque_id, op = "Unlock", %requery,
                              "conflict re-query failed");
                        Err(WopiError::Internal("lock re-query failed".to_string()))
                    }
                }
            }
            Err(err) => {
                warn!(file = %ctx.file_reference.opaque_id, op = "Unlock", %err,
                      "gateway unlock failed");
                Err(WopiError::Internal("unlock failed".to_string()))
            }
        }
    }
}
