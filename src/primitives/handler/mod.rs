#![forbid(unsafe_code)]
//! Byte handler pipeline applied to every serialized page record.
//!
//! Handlers run in configured order when writing and in reverse order when
//! reading. A failing handler never yields partial output.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use serde::{Deserialize, Serialize};

use crate::types::{Result, VersoError};

/// Length of the AES-256 key material.
pub const KEY_LEN: usize = 32;

/// Identifies a byte handler in a resource configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteHandlerKind {
    /// Snappy block compression.
    Snappy,
    /// AES-256-GCM authenticated encryption.
    Encryptor,
}

/// A reversible byte transformation.
pub trait ByteHandler: Send + Sync {
    /// Transforms bytes on their way to storage.
    fn serialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>>;
    /// Inverts [`ByteHandler::serialize`].
    fn deserialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>>;
}

fn invalid_data(msg: impl Into<String>) -> VersoError {
    VersoError::Io(io::Error::new(ErrorKind::InvalidData, msg.into()))
}

/// Snappy compression via `snap::raw`.
#[derive(Debug, Default)]
pub struct SnappyCompressor;

impl ByteHandler for SnappyCompressor {
    fn serialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(&bytes)
            .map_err(|err| invalid_data(format!("snappy compress: {err}")))
    }

    fn deserialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(&bytes)
            .map_err(|err| invalid_data(format!("snappy decompress: {err}")))
    }
}

/// Raw key material for [`Encryptor`].
#[derive(Clone)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    /// Generates fresh random key material.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        KeyMaterial(key)
    }

    /// Wraps existing key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        KeyMaterial(bytes)
    }

    /// Loads key material from a key file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|err| {
            VersoError::Config(format!("cannot read key file {}: {err}", path.display()))
        })?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VersoError::Config(format!("key file {} has wrong length", path.display()))
        })?;
        Ok(KeyMaterial(key))
    }

    /// Writes the key material to `path`.
    pub fn store(&self, path: &Path) -> Result<()> {
        fs::write(path, self.0)?;
        Ok(())
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// AES-256-GCM encryption. Each record is `nonce || ciphertext || tag`.
pub struct Encryptor {
    key: LessSafeKey,
}

impl Encryptor {
    /// Builds an encryptor from key material.
    pub fn new(key: &KeyMaterial) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, &key.0)
            .map_err(|_| VersoError::Config("invalid encryption key".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }
}

impl ByteHandler for Encryptor {
    fn serialize(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut bytes)
            .map_err(|_| invalid_data("encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + bytes.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    fn deserialize(&self, mut bytes: Vec<u8>) -> Result<Vec<u8>> {
        if bytes.len() < NONCE_LEN {
            return Err(invalid_data("encrypted record shorter than nonce"));
        }
        let mut sealed = bytes.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&bytes)
            .map_err(|_| invalid_data("malformed nonce"))?;
        let plain_len = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut sealed)
            .map_err(|_| invalid_data("decryption failed"))?
            .len();
        sealed.truncate(plain_len);
        Ok(sealed)
    }
}

/// Ordered list of handlers applied to each record.
#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<Box<dyn ByteHandler>>,
}

impl Pipeline {
    /// Builds the pipeline for a resource. `key` is required when the
    /// encryptor is configured.
    pub fn new(kinds: &[ByteHandlerKind], key: Option<&KeyMaterial>) -> Result<Self> {
        let mut handlers: Vec<Box<dyn ByteHandler>> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match kind {
                ByteHandlerKind::Snappy => handlers.push(Box::new(SnappyCompressor)),
                ByteHandlerKind::Encryptor => {
                    let key = key.ok_or_else(|| {
                        VersoError::Config("encryption configured without key material".into())
                    })?;
                    handlers.push(Box::new(Encryptor::new(key)?));
                }
            }
        }
        Ok(Self { handlers })
    }

    /// Pipeline that leaves bytes untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Number of configured handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is configured.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every handler in configured order.
    pub fn serialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.handlers
            .iter()
            .try_fold(bytes, |acc, handler| handler.serialize(acc))
    }

    /// Runs every handler in reverse order.
    pub fn deserialize(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.handlers
            .iter()
            .rev()
            .try_fold(bytes, |acc, handler| handler.deserialize(acc))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
