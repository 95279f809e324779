//! AES-256-GCM codec for individual string values.
//!
//! Every value is sealed under a fresh 96-bit nonce and shipped as
//! `base64(nonce ‖ ciphertext ‖ tag)`. The codec knows nothing about HTTP or
//! JSON; callers decide which values pass through it.
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine};
use rand::RngCore;
use thiserror::Error;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("envelope is not valid base64")]
    Encoding,

    #[error("envelope too short: {0} bytes")]
    Truncated(usize),

    #[error("authentication tag mismatch")]
    TagMismatch,

    #[error("decrypted value is not valid UTF-8")]
    Utf8,
}

/// 256-bit symmetric key, zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Decode a key provisioned as standard base64.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let mut raw = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::InvalidKey("key is not valid base64".into()))?;
        let key = Self::from_bytes(&raw);
        raw.zeroize();
        key
    }

    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

/// Generate a new base64 key suitable for `API_ENCRYPTION_SECRET_KEY`.
pub fn generate_key() -> String {
    CipherKey::generate().to_base64()
}

/// Field codec. A codec built without a key is disabled and passes every
/// value through untouched.
#[derive(Clone)]
pub struct CipherCodec {
    cipher: Option<Aes256Gcm>,
}

impl CipherCodec {
    pub fn new(key: &CipherKey) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher: Some(cipher),
        })
    }

    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Build from optional base64 key material. A missing key disables
    /// encryption; a malformed one is rejected.
    pub fn from_base64_key(encoded: Option<&str>) -> Result<Self, CipherError> {
        match encoded.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => Self::new(&CipherKey::from_base64(k)?),
            None => {
                warn!("no encryption key configured; field encryption disabled");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn try_encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let Some(cipher) = self.cipher.as_ref() else {
            return Ok(plaintext.to_string());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    pub fn try_decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let Some(cipher) = self.cipher.as_ref() else {
            return Ok(envelope.to_string());
        };

        let combined = general_purpose::STANDARD
            .decode(envelope)
            .map_err(|_| CipherError::Encoding)?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated(combined.len()));
        }

        let (nonce_bytes, sealed) = combined.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CipherError::Truncated(combined.len()))?;
        let plaintext = cipher
            .decrypt(&Nonce::from(nonce_bytes), sealed)
            .map_err(|_| CipherError::TagMismatch)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    /// Encrypt a value, degrading to the plaintext on failure. The empty
    /// string is returned as-is, so it never gets a fresh envelope.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        match self.try_encrypt(plaintext) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(
                    target: "audit",
                    event = "encrypt_failed",
                    error = %err,
                    "passing value through in plaintext"
                );
                plaintext.to_string()
            }
        }
    }

    /// Decrypt an envelope, degrading to the input on failure. Callers cannot
    /// tell "was never encrypted" from "failed to decrypt".
    pub fn decrypt(&self, envelope: &str) -> String {
        if envelope.is_empty() {
            return String::new();
        }
        match self.try_decrypt(envelope) {
            Ok(plain) => plain,
            Err(err) => {
                warn!(
                    target: "audit",
                    event = "decrypt_failed",
                    error = %err,
                    "passing value through unchanged"
                );
                envelope.to_string()
            }
        }
    }
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherCodec")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Default for CipherCodec {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CipherCodec {
        CipherCodec::new(&CipherKey::generate()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = codec();
        for s in ["Ada", "a@x.com", "1500.75", "ünïcødé ✓", "  spaced  "] {
            let sealed = codec.encrypt(s);
            assert_ne!(sealed, s);
            assert_eq!(codec.decrypt(&sealed), s);
        }
    }

    #[test]
    fn test_envelope_layout() {
        let codec = codec();
        let sealed = codec.encrypt("hello");
        let raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + "hello".len() + TAG_LEN);
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let codec = codec();
        let a = codec.encrypt("same");
        let b = codec.encrypt("same");
        assert_ne!(a, b);
        let raw_a = general_purpose::STANDARD.decode(&a).unwrap();
        let raw_b = general_purpose::STANDARD.decode(&b).unwrap();
        assert_ne!(raw_a[..NONCE_LEN], raw_b[..NONCE_LEN]);
    }

    #[test]
    fn test_tampered_ciphertext_passes_through() {
        let codec = codec();
        let sealed = codec.encrypt("secret");
        let mut raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        raw[NONCE_LEN] ^= 0x01;
        let tampered = general_purpose::STANDARD.encode(&raw);

        assert_eq!(codec.try_decrypt(&tampered), Err(CipherError::TagMismatch));
        assert_eq!(codec.decrypt(&tampered), tampered);
    }

    #[test]
    fn test_tampered_tag_passes_through() {
        let codec = codec();
        let sealed = codec.encrypt("secret");
        let mut raw = general_purpose::STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x80;
        let tampered = general_purpose::STANDARD.encode(&raw);
        assert_eq!(codec.decrypt(&tampered), tampered);
    }

    #[test]
    fn test_wrong_key_passes_through() {
        let sealed = codec().encrypt("secret");
        assert_eq!(codec().decrypt(&sealed), sealed);
    }

    #[test]
    fn test_malformed_envelopes() {
        let codec = codec();
        assert_eq!(codec.try_decrypt("not base64!"), Err(CipherError::Encoding));
        assert_eq!(codec.try_decrypt("AAAA"), Err(CipherError::Truncated(3)));
        assert_eq!(codec.decrypt("plain text"), "plain text");
        assert_eq!(codec.decrypt(""), "");
        assert_eq!(codec.encrypt(""), "");
    }

    #[test]
    fn test_empty_string_is_not_sealed() {
        let codec = codec();
        assert_eq!(codec.encrypt(""), codec.encrypt(""));
        assert_eq!(codec.encrypt(""), "");
        assert!(codec.try_encrypt("").is_ok_and(|sealed| !sealed.is_empty()));
    }

    #[test]
    fn test_disabled_codec_is_passthrough() {
        let codec = CipherCodec::disabled();
        assert!(!codec.is_enabled());
        assert_eq!(codec.encrypt("Ada"), "Ada");
        assert_eq!(codec.decrypt("Ada"), "Ada");
    }

    #[test]
    fn test_key_parsing() {
        let encoded = generate_key();
        assert!(CipherKey::from_base64(&encoded).is_ok());
        assert!(CipherKey::from_base64("c2hvcnQ=").is_err());
        assert!(CipherKey::from_base64("%%%").is_err());
        assert!(CipherCodec::from_base64_key(Some("c2hvcnQ=")).is_err());
        assert!(!CipherCodec::from_base64_key(None).unwrap().is_enabled());
        assert!(!CipherCodec::from_base64_key(Some("  ")).unwrap().is_enabled());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = CipherKey::from_bytes(&[0xAB; KEY_LEN]).unwrap();
        let printed = format!("{:?}", key);
        assert_eq!(printed, "CipherKey(<redacted>)");
        assert!(!printed.contains("ab"));
    }

    #[test]
    fn test_shared_key_interop() {
        let key = CipherKey::generate();
        let encoded = key.to_base64();
        let a = CipherCodec::new(&key).unwrap();
        let b = CipherCodec::from_base64_key(Some(&encoded)).unwrap();
        assert_eq!(b.decrypt(&a.encrypt("transfer")), "transfer");
    }
}
