//! Sealing of masked property values
//!
//! Masked properties are normally recorded as `**********`. A recorder built
//! with a `ValueEncryptor` seals them instead, so the audit log stays
//! readable for whoever holds the key. Each sealed value is bound to the
//! property it was recorded for: a value copied into another property's
//! column fails to unseal.
//!
//! Sealed values are plain text, `sealed:v1:<key id>:<nonce>:<ciphertext>`,
//! so they fit in the same string columns as ordinary recorded values.

use crate::error::{AuditError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;
use std::fmt;

const PREFIX: &str = "sealed:v1:";
const NONCE_LEN: usize = 12;

/// Parsed form of a sealed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub key_id: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl SealedValue {
    /// Parse recorded text; fails for anything not produced by `Display`
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .strip_prefix(PREFIX)
            .ok_or_else(|| AuditError::Encryption("Value is not sealed".to_string()))?;

        // key ids may contain ':', base64 never does
        let mut parts = body.rsplitn(3, ':');
        let (Some(ciphertext), Some(nonce), Some(key_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuditError::Encryption("Truncated sealed value".to_string()));
        };

        let nonce = BASE64
            .decode(nonce)
            .map_err(|e| AuditError::Encryption(format!("Bad nonce: {}", e)))?;
        if nonce.len() != NONCE_LEN {
            return Err(AuditError::Encryption(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce.len()
            )));
        }

        Ok(Self {
            key_id: key_id.to_string(),
            nonce,
            ciphertext: BASE64
                .decode(ciphertext)
                .map_err(|e| AuditError::Encryption(format!("Bad ciphertext: {}", e)))?,
        })
    }

    pub fn is_sealed(text: &str) -> bool {
        Self::parse(text).is_ok()
    }
}

impl fmt::Display for SealedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}:{}",
            PREFIX,
            self.key_id,
            BASE64.encode(&self.nonce),
            BASE64.encode(&self.ciphertext)
        )
    }
}

/// Reversible protection for masked values
pub trait ValueEncryptor: Send + Sync {
    /// Seal `plaintext` recorded for `property`
    fn seal(&self, property: &str, plaintext: &str) -> Result<String>;

    /// Recover a value sealed for `property`
    fn unseal(&self, property: &str, sealed: &str) -> Result<String>;

    /// Key new values are sealed with
    fn active_key_id(&self) -> &str;
}

/// AES-256-GCM sealer
///
/// Seals with the active key. Retired keys stay registered so values
/// recorded before a rotation can still be read.
pub struct Aes256GcmEncryptor {
    active: String,
    ciphers: IndexMap<String, Aes256Gcm>,
}

impl Aes256GcmEncryptor {
    pub fn new(key_id: impl Into<String>, key: &[u8; 32]) -> Self {
        let active = key_id.into();
        let mut ciphers = IndexMap::new();
        ciphers.insert(active.clone(), Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)));
        Self { active, ciphers }
    }

    /// Register another key, keeping the active one
    pub fn with_key(mut self, key_id: impl Into<String>, key: &[u8; 32]) -> Self {
        self.ciphers
            .insert(key_id.into(), Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)));
        self
    }

    /// Seal new values with a registered key
    pub fn rotate_to(&mut self, key_id: &str) -> Result<()> {
        if !self.ciphers.contains_key(key_id) {
            return Err(AuditError::Encryption(format!(
                "Cannot rotate to unregistered key '{}'",
                key_id
            )));
        }
        tracing::info!(from = %self.active, to = %key_id, "Sealing key rotated");
        self.active = key_id.to_string();
        Ok(())
    }

    /// Registered key ids, in registration order
    pub fn key_ids(&self) -> Vec<&str> {
        self.ciphers.keys().map(String::as_str).collect()
    }

    fn cipher(&self, key_id: &str) -> Result<&Aes256Gcm> {
        self.ciphers
            .get(key_id)
            .ok_or_else(|| AuditError::Encryption(format!("Unknown sealing key '{}'", key_id)))
    }
}

impl ValueEncryptor for Aes256GcmEncryptor {
    fn seal(&self, property: &str, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: property.as_bytes(),
        };
        let ciphertext = self
            .cipher(&self.active)?
            .encrypt(&nonce, payload)
            .map_err(|e| AuditError::Encryption(format!("Sealing '{}' failed: {}", property, e)))?;

        Ok(SealedValue {
            key_id: self.active.clone(),
            nonce: nonce.to_vec(),
            ciphertext,
        }
        .to_string())
    }

    fn unseal(&self, property: &str, sealed: &str) -> Result<String> {
        let sealed = SealedValue::parse(sealed)?;
        let payload = Payload {
            msg: sealed.ciphertext.as_slice(),
            aad: property.as_bytes(),
        };
        let plaintext = self
            .cipher(&sealed.key_id)?
            .decrypt(Nonce::from_slice(&sealed.nonce), payload)
            .map_err(|_| {
                AuditError::Encryption(format!(
                    "Value for '{}' does not unseal with key '{}'",
                    property, sealed.key_id
                ))
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| AuditError::Encryption(format!("Unsealed value is not UTF-8: {}", e)))
    }

    fn active_key_id(&self) -> &str {
        &self.active
    }
}
