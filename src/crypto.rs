//! Symmetric and asymmetric primitives shared by the token codec and the
//! proof-key verifier
//!
//! Symmetric encryption is AES in CFB mode with a random 16-byte IV prepended
//! to the ciphertext, the whole sequence base64url encoded. Keys are
//! normalized to the smallest AES key size that fits the input so a caller
//! never silently gets a weaker cipher than the secret it supplied.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

/// AES block size; also the length of the prepended IV
const IV_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("cipher initialization failed")]
    InvalidKeyOrIv,

    #[error("decrypted payload is not valid UTF-8")]
    InvalidPlaintext,

    #[error("base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// Normalize a key to 16, 24 or 32 bytes.
///
/// Keys up to 16 bytes are zero-padded to 16, up to 24 padded to 24, up to
/// 32 padded to 32, and anything longer is truncated to 32. This selects the
/// smallest AES key size that holds the input.
fn normalize_key(key: &[u8]) -> Vec<u8> {
    let target = match key.len() {
        0..=16 => 16,
        17..=24 => 24,
        _ => 32,
    };
    let mut normalized = key.to_vec();
    normalized.resize(target, 0);
    normalized
}

/// Encrypt `plaintext` with AES-CFB under the normalized `key`.
///
/// Returns `base64url(iv ‖ ciphertext)` with a freshly generated 16-byte IV.
pub fn encrypt_aes(key: &[u8], plaintext: &str) -> Result<String, CryptoError> {
    let key = normalize_key(key);

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut buf = plaintext.as_bytes().to_vec();
    match key.len() {
        16 => cfb_mode::Encryptor::<Aes128>::new_from_slices(&key, &iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .encrypt(&mut buf),
        24 => cfb_mode::Encryptor::<Aes192>::new_from_slices(&key, &iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .encrypt(&mut buf),
        _ => cfb_mode::Encryptor::<Aes256>::new_from_slices(&key, &iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .encrypt(&mut buf),
    }

    let mut out = iv.to_vec();
    out.extend_from_slice(&buf);
    Ok(URL_SAFE.encode(out))
}

/// Decrypt a string produced by [`encrypt_aes`].
///
/// Fails with [`CryptoError::CiphertextTooShort`] when the decoded input
/// cannot even hold the IV block, and with [`CryptoError::InvalidPlaintext`]
/// when the result is not UTF-8 (the usual symptom of a wrong key).
pub fn decrypt_aes(key: &[u8], encoded: &str) -> Result<String, CryptoError> {
    let key = normalize_key(key);

    let decoded = URL_SAFE.decode(encoded)?;
    if decoded.len() < IV_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (iv, ciphertext) = decoded.split_at(IV_SIZE);

    let mut buf = ciphertext.to_vec();
    match key.len() {
        16 => cfb_mode::Decryptor::<Aes128>::new_from_slices(&key, iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .decrypt(&mut buf),
        24 => cfb_mode::Decryptor::<Aes192>::new_from_slices(&key, iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .decrypt(&mut buf),
        _ => cfb_mode::Decryptor::<Aes256>::new_from_slices(&key, iv)
            .map_err(|_| CryptoError::InvalidKeyOrIv)?
            .decrypt(&mut buf),
    }

    String::from_utf8(buf).map_err(|_| CryptoError::InvalidPlaintext)
}

/// Verify an RSA PKCS#1 v1.5 signature over a precomputed SHA-256 digest.
pub fn verify_rsa_signature(pub_key: &RsaPublicKey, digest: &[u8], signature: &[u8]) -> bool {
    pub_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;
    use sha2::Digest;

    #[test]
    fn test_roundtrip_all_key_sizes() -> Result<(), CryptoError> {
        let plaintext = "storage-access-token-value";
        for key in [
            b"short".as_slice(),
            b"exactly-16-bytes".as_slice(),
            b"nineteen-byte-secret".as_slice(),
            b"thirty-one-bytes-of-key-material".as_slice(),
            b"a-key-that-is-much-longer-than-thirty-two-bytes".as_slice(),
        ] {
            let encrypted = encrypt_aes(key, plaintext)?;
            let decrypted = decrypt_aes(key, &encrypted)?;
            assert_eq!(decrypted, plaintext);
        }
        Ok(())
    }

    #[test]
    fn test_key_normalization_sizes() {
        assert_eq!(normalize_key(b"").len(), 16);
        assert_eq!(normalize_key(&[0u8; 16]).len(), 16);
        assert_eq!(normalize_key(&[0u8; 17]).len(), 24);
        assert_eq!(normalize_key(&[0u8; 24]).len(), 24);
        assert_eq!(normalize_key(&[0u8; 25]).len(), 32);
        assert_eq!(normalize_key(&[0u8; 32]).len(), 32);
        assert_eq!(normalize_key(&[0u8; 48]).len(), 32);
    }

    #[test]
    fn test_encryption_is_randomized() -> Result<(), CryptoError> {
        let key = b"some-signing-secret";
        let a = encrypt_aes(key, "same input")?;
        let b = encrypt_aes(key, "same input")?;
        assert_ne!(a, b); // fresh IV per call
        Ok(())
    }

    #[test]
    fn test_decrypt_with_wrong_key_does_not_yield_plaintext() {
        let encrypted = encrypt_aes(b"the-right-key", "reva-access-token").unwrap();
        match decrypt_aes(b"not-the-right-key", &encrypted) {
            Ok(garbage) => assert_ne!(garbage, "reva-access-token"),
            Err(err) => assert!(matches!(err, CryptoError::InvalidPlaintext)),
        }
    }

    #[test]
    fn test_decrypt_truncated_input_fails() {
        let too_short = URL_SAFE.encode([0u8; 7]);
        let result = decrypt_aes(b"key", &too_short);
        assert!(matches!(result, Err(CryptoError::CiphertextTooShort)));
    }

    #[test]
    fn test_decrypt_invalid_base64_fails() {
        let result = decrypt_aes(b"key", "!!not base64!!");
        assert!(matches!(result, Err(CryptoError::Base64Error(_))));
    }

    #[test]
    fn test_rsa_signature_verification() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_key = private_key.to_public_key();

        let digest = sha2::Sha256::digest(b"proof artifact bytes");
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let signature = signing_key.sign(b"proof artifact bytes").to_vec();

        assert!(verify_rsa_signature(&public_key, &digest, &signature));

        let other_digest = sha2::Sha256::digest(b"different bytes");
        assert!(!verify_rsa_signature(&public_key, &other_digest, &signature));
    }
}
