//! HTTP client for the storage gateway
//!
//! Each RPC of the [`StorageGateway`] contract maps onto one JSON POST. The
//! gateway reports its outcome as a status string; everything outside the
//! contract's named statuses is carried as an opaque internal error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use wopihost::context::FileReference;
use wopihost::storage::{
    FileLock, GatewayCode, GatewayError, StatInfo, StorageGateway, TransferEndpoint, UploadRequest,
};

/// Header carrying the storage access credential on gateway RPCs.
const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct FileRequest<'a> {
    #[serde(rename = "ref")]
    file: &'a FileReference,
}

#[derive(Debug, Serialize)]
struct LockRequest<'a> {
    #[serde(rename = "ref")]
    file: &'a FileReference,
    lock: &'a FileLock,
    #[serde(rename = "existingLockId", skip_serializing_if = "Option::is_none")]
    existing_lock_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct InitiateUploadRequest<'a> {
    #[serde(rename = "ref")]
    file: &'a FileReference,
    upload: &'a UploadRequest,
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(flatten)]
    envelope: StatusEnvelope,
    info: Option<StatInfo>,
}

#[derive(Debug, Deserialize)]
struct GetLockResponse {
    #[serde(flatten)]
    envelope: StatusEnvelope,
    lock: Option<FileLock>,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    #[serde(flatten)]
    envelope: StatusEnvelope,
    #[serde(default)]
    protocols: Vec<TransferEndpoint>,
}

fn code_for(status: &str) -> Option<GatewayCode> {
    match status {
        "OK" => None,
        "NOT_FOUND" => Some(GatewayCode::NotFound),
        "FAILED_PRECONDITION" => Some(GatewayCode::FailedPrecondition),
        "ABORTED" => Some(GatewayCode::Aborted),
        "LOCKED" => Some(GatewayCode::Locked),
        _ => Some(GatewayCode::Other),
    }
}

impl StatusEnvelope {
    fn into_result(self) -> Result<(), GatewayError> {
        match code_for(&self.status) {
            None => Ok(()),
            Some(code) => Err(GatewayError::new(
                code,
                format!("{} ({})", self.message, self.status),
            )),
        }
    }
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::new(GatewayCode::Other, e.to_string()))?;
        Ok(GatewayClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        token: &str,
        op: &str,
        request: &Req,
    ) -> Result<Resp, GatewayError> {
        let response = self
            .http
            .post(format!("{}/v1/{}", self.base_url, op))
            .header(ACCESS_TOKEN_HEADER, token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                GatewayError::new(GatewayCode::Other, format!("gateway {op} failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::new(
                GatewayCode::Other,
                format!("gateway {op} returned HTTP {status}"),
            ));
        }

        response.json::<Resp>().await.map_err(|e| {
            GatewayError::new(
                GatewayCode::Other,
                format!("gateway {op} returned malformed response: {e}"),
            )
        })
    }
}

#[async_trait]
impl StorageGateway for GatewayClient {
    async fn stat(&self, token: &str, file: &FileReference) -> Result<StatInfo, GatewayError> {
        let response: StatResponse = self.call(token, "stat", &FileRequest { file }).await?;
        response.envelope.into_result()?;
        response
            .info
            .ok_or_else(|| GatewayError::new(GatewayCode::Other, "stat response without info"))
    }

    async fn get_lock(
        &self,
        token: &str,
        file: &FileReference,
    ) -> Result<Option<FileLock>, GatewayError> {
        let response: GetLockResponse = self.call(token, "getlock", &FileRequest { file }).await?;
        response.envelope.into_result()?;
        Ok(response.lock)
    }

    async fn set_lock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError> {
        let request = LockRequest {
            file,
            lock,
            existing_lock_id: None,
        };
        let response: StatusEnvelope = self.call(token, "setlock", &request).await?;
        response.into_result()
    }

    async fn refresh_lock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
        existing_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let request = LockRequest {
            file,
            lock,
            existing_lock_id: existing_id,
        };
        let response: StatusEnvelope = self.call(token, "refreshlock", &request).await?;
        response.into_result()
    }

    async fn unlock(
        &self,
        token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError> {
        let request = LockRequest {
            file,
            lock,
            existing_lock_id: None,
        };
        let response: StatusEnvelope = self.call(token, "unlock", &request).await?;
        response.into_result()
    }

    async fn initiate_download(
        &self,
        token: &str,
        file: &FileReference,
    ) -> Result<Vec<TransferEndpoint>, GatewayError> {
        let response: TransferResponse = self
            .call(token, "initiate-download", &FileRequest { file })
            .await?;
        response.envelope.into_result()?;
        Ok(response.protocols)
    }

    async fn initiate_upload(
        &self,
        token: &str,
        file: &FileReference,
        request: &UploadRequest,
    ) -> Result<Vec<TransferEndpoint>, GatewayError> {
        let response: TransferResponse = self
            .call(
                token,
                "initiate-upload",
                &InitiateUploadRequest {
                    file,
                    upload: request,
                },
            )
            .await?;
        response.envelope.into_result()?;
        Ok(response.protocols)
    }
}
