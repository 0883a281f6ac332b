//! Password-bound credential cipher built on Argon2id and ChaCha20-Poly1305.
//!
//! Ciphertexts are self-describing text values (`enc:v1:<base64>`) so they can
//! sit in a `KEY=VALUE` file next to plaintext entries. The base64 payload is
//! nonce + ciphertext + auth tag.
//!
//! Encryption is deterministic: the nonce is an HMAC of the plaintext under a
//! key derived from the password, so the same password and plaintext always
//! yield the same ciphertext.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;
use zeroize::Zeroizing;

use super::integrity::{hkdf_expand_key, hmac_sha256, sha256_digest};

/// Marks a value as produced by [`CredentialCipher::encrypt`].
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;

const KDF_SALT_CONTEXT: &[u8] = b"jupgrid/credential-cipher/argon2id-salt/v1";
const ENCRYPTION_KEY_INFO: &[u8] = b"jupgrid/credential-cipher/encryption-key";
const NONCE_KEY_INFO: &[u8] = b"jupgrid/credential-cipher/nonce-key";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// The value is not a well-formed ciphertext (prefix, base64 or length).
    #[error("malformed ciphertext: {0}")]
    Decode(String),
    /// The ciphertext is well formed but the auth tag did not verify: either a
    /// different password or a modified value.
    #[error("ciphertext authentication failed")]
    Authentication,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }
}

impl Default for KdfParams {
    /// 19 MiB, 3 passes, single lane: an interactive unlock stays well under a
    /// second while offline guessing remains memory-bound.
    fn default() -> Self {
        Self::new(19 * 1024, 3, 1)
    }
}

/// Returns true when `value` carries the ciphertext marker.
pub fn is_ciphertext(value: &str) -> bool {
    value.starts_with(CIPHERTEXT_PREFIX)
}

/// Holds the key material derived from one password for the lifetime of a
/// bootstrap session. Both sub-keys are zeroed on drop.
pub struct CredentialCipher {
    encryption_key: Zeroizing<[u8; DERIVED_KEY_LEN]>,
    nonce_key: Zeroizing<[u8; DERIVED_KEY_LEN]>,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("encryption_key", &"<redacted>")
            .field("nonce_key", &"<redacted>")
            .finish()
    }
}

impl CredentialCipher {
    /// Derives a cipher from `password` with the default cost parameters.
    pub fn new(password: &str) -> Result<Self, CipherError> {
        Self::with_params(password, KdfParams::default())
    }

    pub fn with_params(password: &str, kdf: KdfParams) -> Result<Self, CipherError> {
        let params = Params::new(
            kdf.memory_kib,
            kdf.iterations,
            kdf.parallelism,
            Some(DERIVED_KEY_LEN),
        )
        .map_err(|e| CipherError::Derivation(format!("{e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        // The record has no room for a per-install salt, so the salt is a
        // fixed application-scoped value.
        let salt = sha256_digest(KDF_SALT_CONTEXT);
        let mut master = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), &salt, &mut *master)
            .map_err(|e| CipherError::Derivation(format!("{e}")))?;

        let encryption_key = hkdf_expand_key(&*master, None, ENCRYPTION_KEY_INFO)
            .map_err(|e| CipherError::Derivation(format!("{e}")))?;
        let nonce_key = hkdf_expand_key(&*master, None, NONCE_KEY_INFO)
            .map_err(|e| CipherError::Derivation(format!("{e}")))?;

        Ok(Self {
            encryption_key,
            nonce_key,
        })
    }

    /// One-shot form: derives a cipher for `password` and encrypts `plaintext`.
    pub fn encrypt_with_password(
        plaintext: &str,
        password: &str,
        kdf: KdfParams,
    ) -> Result<String, CipherError> {
        Self::with_params(password, kdf)?.encrypt(plaintext)
    }

    /// Encrypts `plaintext` under the bound password.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let synthetic = hmac_sha256(&*self.nonce_key, plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(format!("{e}")))?;
        let nonce = Nonce::from_slice(&synthetic[..NONCE_LEN]);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.encryption_key));
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(format!("{e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
        payload.extend_from_slice(nonce);
        payload.extend_from_slice(&sealed);
        Ok(format!("{CIPHERTEXT_PREFIX}{}", STANDARD_NO_PAD.encode(payload)))
    }

    /// Decrypts a value produced by [`CredentialCipher::encrypt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let encoded = ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| CipherError::Decode("missing ciphertext prefix".to_string()))?;
        let payload = STANDARD_NO_PAD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| CipherError::Decode(format!("{e}")))?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Decode(format!(
                "ciphertext truncated to {} bytes",
                payload.len()
            )));
        }

        let (nonce, sealed) = payload.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.encryption_key));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| CipherError::Authentication)?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| CipherError::Decode(format!("plaintext is not utf-8: {e}")))
    }
}
