//! Authenticated encryption of ballot payloads.
//!
//! Payloads are sealed with AES-256-GCM under a single process-wide key and
//! stored as a URL-safe base64 token:
//!
//! `version (1) || iv (12) || ciphertext || tag (16)`
//!
//! The tag binds confidentiality and integrity into the token itself, so a
//! payload that was altered, truncated, or sealed under another key fails to
//! open regardless of what the block hash says.

use std::fmt;

use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CipherError, CipherResult};

/// Key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

const IV_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

const TOKEN_VERSION: u8 = 0x01;

/// Associated data bound into every tag.
const AAD: &[u8] = b"ballot-ledger/payload/v1";

/// The process-wide payload key. Loaded once at startup and never derived
/// from block data.
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadKey([u8; KEY_SIZE]);

impl PayloadKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        PayloadKey(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> CipherResult<Self> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CipherError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, bytes.len()))
        })?;
        Ok(PayloadKey(key))
    }

    pub fn from_base64(encoded: &str) -> CipherResult<Self> {
        let bytes = base64::decode_config(encoded.trim(), base64::URL_SAFE)
            .map_err(|e| CipherError::InvalidKey(format!("bad base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        base64::encode_config(self.0, base64::URL_SAFE)
    }
}

impl fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadKey(..)")
    }
}

/// Seals and opens ballot payloads under one key.
#[derive(Clone, Debug)]
pub struct PayloadCipher {
    key: PayloadKey,
}

impl PayloadCipher {
    pub fn new(key: PayloadKey) -> Self {
        PayloadCipher { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CipherResult<String> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut tag = [0u8; TAG_SIZE];
        let ciphertext = encrypt_aead(
            Cipher::aes_256_gcm(),
            &self.key.0,
            Some(&iv[..]),
            AAD,
            plaintext,
            &mut tag,
        )
        .map_err(|e| CipherError::Encryption(e.to_string()))?;

        let mut token = Vec::with_capacity(1 + IV_SIZE + ciphertext.len() + TAG_SIZE);
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);
        token.extend_from_slice(&tag);

        Ok(base64::encode_config(token, base64::URL_SAFE))
    }

    pub fn decrypt(&self, token: &str) -> CipherResult<Vec<u8>> {
        let raw = base64::decode_config(token, base64::URL_SAFE)
            .map_err(|e| CipherError::Decryption(format!("bad base64: {}", e)))?;

        if raw.len() < 1 + IV_SIZE + TAG_SIZE {
            return Err(CipherError::Decryption(format!(
                "token too short: {} bytes",
                raw.len()
            )));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(CipherError::Decryption(format!(
                "unknown token version {:#04x}",
                raw[0]
            )));
        }

        let iv = &raw[1..1 + IV_SIZE];
        let (body, tag) = raw[1 + IV_SIZE..].split_at(raw.len() - 1 - IV_SIZE - TAG_SIZE);

        decrypt_aead(Cipher::aes_256_gcm(), &self.key.0, Some(iv), AAD, body, tag)
            .map_err(|_| CipherError::Decryption("authentication failed".into()))
    }
}
