//! WOPI protocol adapter
//!
//! The single place wire-format knowledge lives: routes, header names, and
//! the mapping from structured component results to HTTP status codes. The
//! library components below this layer never see an HTTP status.

use axum::body::Body;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use wopihost::content::ContentTransfer;
use wopihost::context::WopiContext;
use wopihost::error::WopiError;
use wopihost::fileinfo;
use wopihost::lock::LockManager;
use wopihost::proofkey::ProofKeyVerifier;
use wopihost::storage::StorageGateway;
use wopihost::token::{CodecConfig, SessionCodec};

use crate::config::ServerConfig;
use crate::gateway::GatewayClient;

pub const HDR_OVERRIDE: &str = "X-WOPI-Override";
pub const HDR_LOCK: &str = "X-WOPI-Lock";
pub const HDR_OLD_LOCK: &str = "X-WOPI-OldLock";
pub const HDR_ITEM_VERSION: &str = "X-WOPI-ItemVersion";
pub const HDR_LOCK_FAILURE_REASON: &str = "X-WOPI-LockFailureReason";
pub const HDR_TIMESTAMP: &str = "X-WOPI-TimeStamp";
pub const HDR_PROOF: &str = "X-WOPI-Proof";
pub const HDR_PROOF_OLD: &str = "X-WOPI-ProofOld";

pub struct AppState {
    pub codec: SessionCodec,
    pub gateway: Arc<GatewayClient>,
    pub locks: LockManager<GatewayClient>,
    pub content: ContentTransfer<GatewayClient>,
    pub verifier: Option<ProofKeyVerifier>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, WopiError> {
        let gateway = Arc::new(
            GatewayClient::new(config.gateway_url.clone()).map_err(WopiError::from)?,
        );

        let mut codec_config =
            CodecConfig::new(config.token_secret.clone(), config.wopi_base_url.clone());
        codec_config.token_ttl = config.token_ttl;
        codec_config.proxy_url = config.proxy_url.clone();
        codec_config.proxy_secret = config.proxy_secret.clone();

        let verifier = if config.proofkeys_enabled {
            Some(ProofKeyVerifier::new(config.proofkey_ttl).map_err(WopiError::from)?)
        } else {
            None
        };

        Ok(AppState {
            codec: SessionCodec::new(codec_config),
            locks: LockManager::new(Arc::clone(&gateway), config.app_name.clone()),
            content: ContentTransfer::new(Arc::clone(&gateway))?,
            verifier,
            gateway,
            config,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/wopi/files/{id}",
            get(check_file_info).post(files_dispatch),
        )
        .route(
            "/wopi/files/{id}/contents",
            get(get_contents).post(put_contents),
        )
        .with_state(state)
}

/// Wire-side wrapper so the library error taxonomy can carry an axum
/// response mapping without the library depending on HTTP.
pub struct WireError(pub WopiError);

impl From<WopiError> for WireError {
    fn from(err: WopiError) -> Self {
        WireError(err)
    }
}

impl IntoResponse for WireError {
    fn into_response(self) -> Response {
        match self.0 {
            WopiError::BadRequest(_) => StatusCode::BAD_REQUEST.into_response(),
            WopiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            WopiError::Conflict { lock_id } => {
                let mut response = StatusCode::CONFLICT.into_response();
                response
                    .headers_mut()
                    .insert(HDR_LOCK, header_value(&lock_id));
                response.headers_mut().insert(
                    HDR_LOCK_FAILURE_REASON,
                    HeaderValue::from_static("lock mismatch"),
                );
                response
            }
            WopiError::Unauthorized(_) => StatusCode::UNAUTHORIZED.into_response(),
            WopiError::Internal(message) => {
                // Logged here, never sent to the caller.
                error!(%message, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    access_token: String,
}

/// Token parse first, proof verification second, both before any
/// side-effecting operation.
async fn authenticate(
    state: &AppState,
    query: &TokenQuery,
    headers: &axum::http::HeaderMap,
    uri: &axum::http::Uri,
) -> Result<WopiContext, WireError> {
    let ctx = state
        .codec
        .parse(&query.access_token)
        .map_err(WopiError::from)?;

    if let (Some(verifier), Some(discovery_url)) =
        (&state.verifier, &state.config.discovery_url)
    {
        let callback_url = format!(
            "{}{}",
            state.config.wopi_base_url.trim_end_matches('/'),
            uri
        );
        verifier
            .verify(
                discovery_url,
                &query.access_token,
                &callback_url,
                header_str(headers, HDR_TIMESTAMP),
                header_str(headers, HDR_PROOF),
                header_str(headers, HDR_PROOF_OLD),
            )
            .await
            .map_err(WopiError::from)?;
    }

    Ok(ctx)
}

async fn check_file_info(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
    Query(query): Query<TokenQuery>,
    OriginalUri(uri): OriginalUri,
    headers: axum::http::HeaderMap,
) -> Result<Response, WireError> {
    let ctx = authenticate(&state, &query, &headers, &uri).await?;

    let stat = state
        .gateway
        .stat(&ctx.storage_access_token, &ctx.file_reference)
        .await
        .map_err(WopiError::from)?;

    let info = fileinfo::populate(state.config.app_style, &ctx, &stat).map_err(WopiError::from)?;
    Ok(Json(info.to_json()).into_response())
}

async fn files_dispatch(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
    Query(query): Query<TokenQuery>,
    OriginalUri(uri): OriginalUri,
    headers: axum::http::HeaderMap,
) -> Result<Response, WireError> {
    let ctx = authenticate(&state, &query, &headers, &uri).await?;

    let lock_id = header_str(&headers, HDR_LOCK);
    match header_str(&headers, HDR_OVERRIDE) {
        "LOCK" => {
            let old_lock_id = header_str(&headers, HDR_OLD_LOCK);
            state.locks.lock(&ctx, lock_id, old_lock_id).await?;
            Ok(StatusCode::OK.into_response())
        }
        "GET_LOCK" => {
            let current = state.locks.get_lock(&ctx).await?;
            let mut response = StatusCode::OK.into_response();
            response
                .headers_mut()
                .insert(HDR_LOCK, header_value(&current));
            Ok(response)
        }
        "REFRESH_LOCK" => {
            state.locks.refresh_lock(&ctx, lock_id).await?;
            Ok(StatusCode::OK.into_response())
        }
        "UNLOCK" => {
            state.locks.unlock(&ctx, lock_id).await?;
            Ok(StatusCode::OK.into_response())
        }
        other => Err(WireError(WopiError::BadRequest(format!(
            "unsupported X-WOPI-Override {other:?}"
        )))),
    }
}

async fn get_contents(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
    Query(query): Query<TokenQuery>,
    OriginalUri(uri): OriginalUri,
    headers: axum::http::HeaderMap,
) -> Result<Response, WireError> {
    let ctx = authenticate(&state, &query, &headers, &uri).await?;

    let stream = state.content.get_file(&ctx).await?;
    Ok(Body::from_stream(stream).into_response())
}

async fn put_contents(
    State(state): State<Arc<AppState>>,
    Path(_id): Path<String>,
    Query(query): Query<TokenQuery>,
    OriginalUri(uri): OriginalUri,
    headers: axum::http::HeaderMap,
    body: Body,
) -> Result<Response, WireError> {
    let ctx = authenticate(&state, &query, &headers, &uri).await?;

    if header_str(&headers, HDR_OVERRIDE) != "PUT" {
        return Err(WireError(WopiError::BadRequest(
            "expected X-WOPI-Override: PUT".to_string(),
        )));
    }

    let content_length: u64 = header_str(&headers, "Content-Length")
        .parse()
        .map_err(|_| WopiError::BadRequest("missing Content-Length".to_string()))?;
    let lock_id = header_str(&headers, HDR_LOCK);

    let source = reqwest::Body::wrap_stream(body.into_data_stream());
    let version = state
        .content
        .put_file(&ctx, source, content_length, lock_id)
        .await?;

    let mut response = StatusCode::OK.into_response();
    if !version.is_empty() {
        response
            .headers_mut()
            .insert(HDR_ITEM_VERSION, header_value(&version));
    }
    Ok(response)
}
