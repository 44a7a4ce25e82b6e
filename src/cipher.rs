//! At-rest encryption of message bodies.
//!
//! Tokens are `base64(iv || ciphertext)` where the ciphertext is the
//! plaintext XORed with an AES-CTR keystream. The key length picks the AES
//! variant. There is no authentication tag: a tampered token decrypts to
//! garbage instead of failing.

use aes::{Aes128, Aes192, Aes256};
use base64::{Engine, engine::general_purpose::STANDARD};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use thiserror::Error;

/// AES block size, which is also the IV length.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKey(usize),

    #[error("ciphertext token is shorter than one block")]
    Malformed,

    #[error("ciphertext token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

#[derive(Clone)]
enum Key {
    Aes128([u8; 16]),
    Aes192([u8; 24]),
    Aes256([u8; 32]),
}

#[derive(Clone)]
pub struct MessageCipher {
    key: Key,
}

impl MessageCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        let key = match key.len() {
            16 => Key::Aes128(key.try_into().map_err(|_| CipherError::InvalidKey(16))?),
            24 => Key::Aes192(key.try_into().map_err(|_| CipherError::InvalidKey(24))?),
            32 => Key::Aes256(key.try_into().map_err(|_| CipherError::InvalidKey(32))?),
            n => return Err(CipherError::InvalidKey(n)),
        };
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> String {
        let iv: [u8; BLOCK_SIZE] = rand::random();

        let mut token = Vec::with_capacity(BLOCK_SIZE + plaintext.len());
        token.extend_from_slice(&iv);
        token.extend_from_slice(plaintext.as_bytes());
        self.apply_keystream(&iv, &mut token[BLOCK_SIZE..]);

        STANDARD.encode(token)
    }

    /// Wrong keys or corrupted bodies still decode; invalid UTF-8 is replaced.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let mut data = STANDARD.decode(token)?;
        if data.len() < BLOCK_SIZE {
            return Err(CipherError::Malformed);
        }

        let (iv, body) = data.split_at_mut(BLOCK_SIZE);
        let iv: [u8; BLOCK_SIZE] = (&*iv).try_into().map_err(|_| CipherError::Malformed)?;
        self.apply_keystream(&iv, body);

        Ok(String::from_utf8_lossy(body).into_owned())
    }

    fn apply_keystream(&self, iv: &[u8; BLOCK_SIZE], buf: &mut [u8]) {
        match &self.key {
            Key::Aes128(k) => Ctr128BE::<Aes128>::new(k.into(), iv.into()).apply_keystream(buf),
            Key::Aes192(k) => Ctr128BE::<Aes192>::new(k.into(), iv.into()).apply_keystream(buf),
            Key::Aes256(k) => Ctr128BE::<Aes256>::new(k.into(), iv.into()).apply_keystream(buf),
        }
    }
}
