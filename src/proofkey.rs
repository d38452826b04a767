//! Proof-key verification of inbound WOPI callbacks
//!
//! The editing application signs every callback with an RSA key pair it
//! publishes through its discovery document. Key rotation is asynchronous
//! between the application and this host, so verification tolerates the
//! documented three-way window: the current signature under the current
//! key, the previous signature under the current key, or the current
//! signature under the previous key.
//!
//! This verifier is advisory middleware: callers that skip it accept
//! callbacks from any party with a valid session token. When enabled, a
//! verification failure must reject the request before any side-effecting
//! lock or content operation runs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use quick_xml::events::Event;
use quick_xml::Reader;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::crypto;

/// How long fetched proof keys stay trusted before a refetch is required.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Discovery document unreachable, non-200, malformed, or lacking a
    /// usable proof-key element. The key cache is never populated from a
    /// failed fetch.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// None of the three tolerated signature/key pairings matched.
    #[error("proof signature mismatch")]
    ProofMismatch,

    #[error("malformed proof header: {0}")]
    MalformedHeader(String),
}

/// Public keys published by one application's discovery document.
/// Replaced wholesale on refresh, never merged.
#[derive(Debug, Clone)]
pub struct ProofKeys {
    pub current: RsaPublicKey,
    pub previous: Option<RsaPublicKey>,
}

struct CachedKeys {
    keys: ProofKeys,
    fetched_at: Instant,
}

/// TTL-cached verifier, keyed by discovery URL.
pub struct ProofKeyVerifier {
    client: reqwest::Client,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CachedKeys>>,
}

impl ProofKeyVerifier {
    pub fn new(cache_ttl: Duration) -> Result<Self, VerificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VerificationError::Discovery(e.to_string()))?;
        Ok(ProofKeyVerifier {
            client,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Verify that an inbound callback was signed by the application that
    /// publishes `discovery_url`.
    ///
    /// `callback_url` is the full public URL of the request including the
    /// `access_token` query; `timestamp_header` is the raw
    /// `X-WOPI-TimeStamp` value; `proof` and `old_proof` are the base64
    /// `X-WOPI-Proof` / `X-WOPI-ProofOld` headers.
    pub async fn verify(
        &self,
        discovery_url: &str,
        access_token: &str,
        callback_url: &str,
        timestamp_header: &str,
        proof: &str,
        old_proof: &str,
    ) -> Result<(), VerificationError> {
        let timestamp: u64 = timestamp_header.trim().parse().map_err(|_| {
            VerificationError::MalformedHeader(format!(
                "X-WOPI-TimeStamp {timestamp_header:?} is not numeric"
            ))
        })?;

        let keys = self.keys_for(discovery_url).await?;

        let artifact = build_proof_artifact(access_token, callback_url, timestamp);
        let digest = Sha256::digest(&artifact);

        if verify_against_keys(&keys, &digest, proof, old_proof) {
            Ok(())
        } else {
            Err(VerificationError::ProofMismatch)
        }
    }

    /// Return fresh keys for `discovery_url`, refetching when the cache
    /// entry is absent or older than the TTL. Writers serialize on the
    /// cache write lock and re-check freshness after acquiring it, so
    /// concurrent refreshes for the same URL collapse to one fetch.
    async fn keys_for(&self, discovery_url: &str) -> Result<ProofKeys, VerificationError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(discovery_url) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.keys.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(entry) = cache.get(discovery_url) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Ok(entry.keys.clone());
            }
        }

        let keys = self.fetch_discovery(discovery_url).await?;
        cache.insert(
            discovery_url.to_string(),
            CachedKeys {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(keys)
    }

    async fn fetch_discovery(&self, discovery_url: &str) -> Result<ProofKeys, VerificationError> {
        let response = self
            .client
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| VerificationError::Discovery(format!("discovery fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::Discovery(format!(
                "discovery document returned HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| VerificationError::Discovery(format!("discovery read failed: {e}")))?;

        parse_proof_keys(&body)
    }
}

/// The byte sequence the application signs:
/// `be32(len(token)) ‖ token ‖ be32(len(upper(url))) ‖ upper(url) ‖ be32(8) ‖ be64(timestamp)`.
/// Purely transient, recomputed per verification.
pub fn build_proof_artifact(access_token: &str, callback_url: &str, timestamp: u64) -> Vec<u8> {
    let url_upper = callback_url.to_uppercase();
    let mut buf =
        Vec::with_capacity(access_token.len() + url_upper.len() + 3 * 4 + 8);
    buf.extend_from_slice(&(access_token.len() as u32).to_be_bytes());
    buf.extend_from_slice(access_token.as_bytes());
    buf.extend_from_slice(&(url_upper.len() as u32).to_be_bytes());
    buf.extend_from_slice(url_upper.as_bytes());
    buf.extend_from_slice(&8u32.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf
}

/// Try, in order: current signature under the current key, previous
/// signature under the current key (the application just rotated), current
/// signature under the previous key (this host just rotated its copy).
fn verify_against_keys(keys: &ProofKeys, digest: &[u8], proof: &str, old_proof: &str) -> bool {
    let proof_sig = BASE64.decode(proof).unwrap_or_default();
    let old_proof_sig = BASE64.decode(old_proof).unwrap_or_default();

    if !proof_sig.is_empty() && crypto::verify_rsa_signature(&keys.current, digest, &proof_sig) {
        return true;
    }
    if !old_proof_sig.is_empty()
        && crypto::verify_rsa_signature(&keys.current, digest, &old_proof_sig)
    {
        return true;
    }
    if let Some(previous) = &keys.previous {
        if !proof_sig.is_empty() && crypto::verify_rsa_signature(previous, digest, &proof_sig) {
            return true;
        }
    }
    false
}

/// Extract the proof keys from a discovery document.
///
/// The document must carry a `proof-key` element with base64 `modulus` and
/// `exponent` attributes; `oldmodulus`/`oldexponent` are optional. Only the
/// proof-key element is consumed here; action URL tables are not parsed.
pub fn parse_proof_keys(xml: &str) -> Result<ProofKeys, VerificationError> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"proof-key" =>
            {
                let mut modulus = None;
                let mut exponent = None;
                let mut old_modulus = None;
                let mut old_exponent = None;

                for attr in e.attributes() {
                    let attr = attr.map_err(|err| {
                        VerificationError::Discovery(format!(
                            "malformed proof-key attribute: {err}"
                        ))
                    })?;
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"modulus" => modulus = Some(value),
                        b"exponent" => exponent = Some(value),
                        b"oldmodulus" => old_modulus = Some(value),
                        b"oldexponent" => old_exponent = Some(value),
                        _ => {}
                    }
                }

                let (modulus, exponent) = match (modulus, exponent) {
                    (Some(m), Some(e)) if !m.is_empty() && !e.is_empty() => (m, e),
                    _ => {
                        return Err(VerificationError::Discovery(
                            "proof-key element lacks modulus/exponent".to_string(),
                        ))
                    }
                };

                let current = key_from_parts(&modulus, &exponent)?;
                let previous = match (old_modulus, old_exponent) {
                    (Some(m), Some(e)) if !m.is_empty() && !e.is_empty() => {
                        Some(key_from_parts(&m, &e)?)
                    }
                    _ => None,
                };

                return Ok(ProofKeys { current, previous });
            }
            Ok(Event::Eof) => {
                return Err(VerificationError::Discovery(
                    "discovery document has no proof-key element".to_string(),
                ))
            }
            Ok(_) => {}
            Err(err) => {
                return Err(VerificationError::Discovery(format!(
                    "malformed discovery document: {err}"
                )))
            }
        }
    }
}

fn key_from_parts(modulus_b64: &str, exponent_b64: &str) -> Result<RsaPublicKey, VerificationError> {
    let n = BASE64
        .decode(modulus_b64)
        .map_err(|e| VerificationError::Discovery(format!("bad proof-key modulus: {e}")))?;
    let e = BASE64
        .decode(exponent_b64)
        .map_err(|e| VerificationError::Discovery(format!("bad proof-key exponent: {e}")))?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| VerificationError::Discovery(format!("invalid proof key: {e}")))
}
