//! Session-context token codec
//!
//! Produces and consumes the `access_token` a WOPI-compliant application
//! must echo back on every callback. The token is an HS256-signed JWT whose
//! claims carry the whole [`WopiContext`]; the embedded storage access token
//! is additionally AES-CFB encrypted under the same secret so it never
//! travels in clear through the editing application.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::context::{FileReference, WopiContext};
use crate::crypto;

/// Default lifetime of a minted session token. Long enough to outlive an
/// office editing session, short enough to bound lost-token exposure.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(10 * 60 * 60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing access token")]
    MissingToken,

    #[error("invalid access token: {0}")]
    Unauthorized(String),
}

#[derive(Debug, Error)]
pub enum EntryUrlError {
    #[error("configured base URL {0:?} has no host")]
    MissingHost(String),

    #[error("invalid URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("proxy token signing failed: {0}")]
    Signing(String),
}

/// Codec configuration, bound once at startup.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// HMAC signing secret; also the AES key for the inner token
    pub secret: String,
    pub token_ttl: Duration,
    /// Public base URL the editing application calls back on
    pub wopi_base_url: String,
    /// Reverse-proxy indirection: when both are set, entry URLs route
    /// through the proxy's own file-id segment
    pub proxy_url: Option<String>,
    pub proxy_secret: Option<String>,
}

impl CodecConfig {
    pub fn new(secret: impl Into<String>, wopi_base_url: impl Into<String>) -> Self {
        CodecConfig {
            secret: secret.into(),
            token_ttl: DEFAULT_TOKEN_TTL,
            wopi_base_url: wopi_base_url.into(),
            proxy_url: None,
            proxy_secret: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    #[serde(rename = "ctx")]
    context: WopiContext,
    exp: i64,
    jti: String,
}

/// Claims of the proxy indirection token: the proxy decodes these to fan a
/// shared public WOPI endpoint out to the right back end.
#[derive(Debug, Serialize, Deserialize)]
struct ProxyClaims {
    /// Target URL prefix the proxy forwards to
    u: String,
    /// File id segment appended by the proxy
    f: String,
    exp: i64,
}

pub struct SessionCodec {
    config: CodecConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionCodec {
    pub fn new(config: CodecConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        SessionCodec {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Serialize `context` into a signed session token.
    ///
    /// Returns the token string and its expiry as unix-epoch milliseconds,
    /// the unit the WOPI protocol mandates for `access_token_ttl`.
    pub fn mint(&self, context: &WopiContext) -> Result<(String, i64), AuthError> {
        let mut claims_context = context.clone();
        claims_context.storage_access_token =
            crypto::encrypt_aes(self.config.secret.as_bytes(), &context.storage_access_token)
                .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        let expiry = Utc::now()
            + chrono::Duration::from_std(self.config.token_ttl)
                .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        let claims = SessionClaims {
            context: claims_context,
            exp: expiry.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        Ok((token, expiry.timestamp_millis()))
    }

    /// Verify a session token and reconstruct its context.
    ///
    /// Fails on: missing token, bad signature, wrong signing algorithm,
    /// expired token, or failure to decrypt the embedded storage token.
    /// No partial context is ever exposed on failure.
    pub fn parse(&self, token: &str) -> Result<WopiContext, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        let mut context = data.claims.context;
        context.storage_access_token =
            crypto::decrypt_aes(self.config.secret.as_bytes(), &context.storage_access_token)
                .map_err(|e| AuthError::Unauthorized(e.to_string()))?;

        Ok(context)
    }

    /// Build the public URL the editing application is told to call back on.
    ///
    /// The path segment is a URL-safe hash of the file reference, never a
    /// raw storage id. With a proxy configured, the callback instead routes
    /// through the proxy's file-id segment carrying a proxy-signed token.
    pub fn generate_entry_url(&self, file_ref: &FileReference) -> Result<Url, EntryUrlError> {
        let base = Url::parse(&self.config.wopi_base_url)?;
        if base.host().is_none() {
            return Err(EntryUrlError::MissingHost(self.config.wopi_base_url.clone()));
        }

        let file_id = file_reference_id(file_ref);
        let base_str = self.config.wopi_base_url.trim_end_matches('/');

        if let (Some(proxy_url), Some(proxy_secret)) =
            (&self.config.proxy_url, &self.config.proxy_secret)
        {
            let expiry = Utc::now()
                + chrono::Duration::from_std(self.config.token_ttl)
                    .map_err(|e| EntryUrlError::Signing(e.to_string()))?;
            let claims = ProxyClaims {
                u: format!("{}/wopi/files/", base_str),
                f: file_id,
                exp: expiry.timestamp(),
            };
            let proxy_token = encode(
                &Header::new(Algorithm::HS256),
                &claims,
                &EncodingKey::from_secret(proxy_secret.as_bytes()),
            )
            .map_err(|e| EntryUrlError::Signing(e.to_string()))?;

            let url = Url::parse(&format!(
                "{}/wopi/files/{}",
                proxy_url.trim_end_matches('/'),
                proxy_token
            ))?;
            return Ok(url);
        }

        Ok(Url::parse(&format!("{}/wopi/files/{}", base_str, file_id))?)
    }
}

/// URL-safe identifier for a file reference: hex SHA-256 over the canonical
/// reference fields. Storage internals never leak into the callback URL.
pub fn file_reference_id(file_ref: &FileReference) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_ref.storage_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(file_ref.space_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(file_ref.opaque_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(file_ref.path.as_bytes());
    hex::encode(hasher.finalize())
}
