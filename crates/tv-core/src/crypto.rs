//! AES-GCM payload encryption for the relational store.
//!
//! Key size: 16, 24 or 32 bytes (AES-128/192/256).  Nonce: 12 bytes (random).
//!
//! Ciphertext wire format:
//!   [ nonce (12 bytes) | ciphertext + tag ]

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::{MigrateError, Result};

type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric key for the `data` columns. Zeroed on drop.
#[derive(Clone)]
pub struct AesKey(Zeroizing<Vec<u8>>);

impl AesKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        validate_aes_key(bytes)?;
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    /// Decode the base64 `aesKey` config value.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| MigrateError::Config(format!("aesKey is not valid base64: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AesKey({} bytes)", self.0.len())
    }
}

pub fn validate_aes_key(key: &[u8]) -> Result<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(MigrateError::Config(format!(
            "AES key must be 16, 24 or 32 bytes, got {n}"
        ))),
    }
}

/// Encrypt `plaintext`, prepending a random nonce.
pub fn encrypt(key: &AesKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    match key.len() {
        16 => seal::<Aes128Gcm>(&key.0, plaintext),
        24 => seal::<Aes192Gcm>(&key.0, plaintext),
        _ => seal::<Aes256Gcm>(&key.0, plaintext),
    }
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &AesKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.is_empty() {
        return Err(MigrateError::Crypto("ciphertext is empty".into()));
    }
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(MigrateError::Crypto(format!(
            "malformed ciphertext: {} bytes",
            data.len()
        )));
    }
    match key.len() {
        16 => open::<Aes128Gcm>(&key.0, data),
        24 => open::<Aes192Gcm>(&key.0, data),
        _ => open::<Aes256Gcm>(&key.0, data),
    }
}

fn seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| MigrateError::Crypto(format!("cipher init: {e}")))?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| MigrateError::Crypto(format!("encrypt: {e}")))?;

    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open<C>(key: &[u8], data: &[u8]) -> Result<Zeroizing<Vec<u8>>>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| MigrateError::Crypto(format!("cipher init: {e}")))?;
    let (nonce, ct) = data.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(aes_gcm::aead::Nonce::<C>::from_slice(nonce), ct)
        .map_err(|e| MigrateError::Crypto(format!("decrypt: {e}")))?;
    Ok(Zeroizing::new(plaintext))
}
