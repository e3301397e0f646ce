use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretString};

use super::EncryptionError;

/// Whole-file byte transform applied by [`super::encrypt_in_place`].
pub trait FileTransform: Send + Sync {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// Exact output size for an input of `input_len` bytes.
    fn output_len(&self, input_len: usize) -> usize;
}

/// Magic prefix of every encrypted file.
pub const HEADER: &[u8; 6] = b"MPENC1";

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

/// AES-256-GCM file encryption.
///
/// Output layout: `MPENC1 <12-byte nonce> <ciphertext + 16-byte tag>`.
pub struct AesGcmTransform {
    cipher: Aes256Gcm,
}

impl AesGcmTransform {
    /// Reads a 64-character hex key from the environment variable `name`.
    pub fn from_env(name: &str) -> Result<Self, EncryptionError> {
        let key = std::env::var(name)
            .map(|value| SecretString::from(value.trim().to_string()))
            .map_err(|_| EncryptionError::KeyNotSet {
                name: name.to_string(),
            })?;

        Self::from_hex_key(key.expose_secret())
    }

    pub fn from_hex_key(key_hex: &str) -> Result<Self, EncryptionError> {
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| EncryptionError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| EncryptionError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let body = data
            .strip_prefix(HEADER.as_slice())
            .ok_or_else(|| EncryptionError::Cipher("Missing MPENC1 header".to_string()))?;

        if body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(EncryptionError::Cipher("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = body.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::Cipher(e.to_string()))
    }
}

impl FileTransform for AesGcmTransform {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), input)
            .map_err(|e| EncryptionError::Cipher(e.to_string()))?;

        let mut output = Vec::with_capacity(self.output_len(input.len()));
        output.extend_from_slice(HEADER);
        output.extend_from_slice(&nonce_bytes);
        output.extend(ciphertext);
        Ok(output)
    }

    fn output_len(&self, input_len: usize) -> usize {
        HEADER.len() + NONCE_SIZE + input_len + TAG_SIZE
    }
}

fn rand_bytes<const N: usize>() -> Result<[u8; N], EncryptionError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| EncryptionError::Random(e.to_string()))?;
    Ok(bytes)
}
