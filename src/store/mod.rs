//! # Credential Store
//!
//! Persistent parameters for Wi-Fi, the MQTT endpoint and TLS material.
//!
//! A `ConfigStore` wraps a `StorageBackend` in an async mutex. Every logical
//! operation runs inside a `StoreGuard` obtained from `ConfigStore::open`:
//! holding the guard is "the store is open", and dropping it closes the store
//! on every exit path, discarding anything that was staged but not committed.
//! Helpers that need store access within the same operation take the guard by
//! reference instead of opening it again.
//!
//! Keys are validated before any backend access. Write-only keys never yield
//! their value through the public read path.

pub mod backend;
pub mod hex;
pub mod keys;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use heapless::Vec;
use zeroize::Zeroize;

use crate::error::StoreError;
pub use backend::{MemoryBackend, MemoryError, StorageBackend};
pub use keys::{Domain, Encoding, ParamInfo};

/// Result of reading a parameter through the public path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback<'b> {
    /// The stored value of a readable key.
    Value(&'b [u8]),
    /// A write-only key holds a value; the value itself is withheld.
    Set,
}

/// Shared handle to the persistent parameter namespace.
pub struct ConfigStore<M: RawMutex, B> {
    backend: Mutex<M, B>,
}

impl<M: RawMutex, B: StorageBackend> ConfigStore<M, B> {
    pub const fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Opens the store for one logical operation, waiting for other users.
    pub async fn open(&self) -> StoreGuard<'_, M, B> {
        StoreGuard {
            backend: self.backend.lock().await,
        }
    }
}

/// Exclusive access to the store for the duration of one operation.
pub struct StoreGuard<'s, M: RawMutex, B: StorageBackend> {
    backend: MutexGuard<'s, M, B>,
}

impl<M: RawMutex, B: StorageBackend> StoreGuard<'_, M, B> {
    /// Reads a parameter, copying readable values into `buf`.
    pub fn get<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Readback<'b>, StoreError> {
        let param = keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        if param.write_only {
            return match self.backend.value_len(key).map_err(persistence)? {
                Some(_) => Ok(Readback::Set),
                None => Err(StoreError::NotFound),
            };
        }
        self.read_raw(key, buf)?
            .map(Readback::Value)
            .ok_or(StoreError::NotFound)
    }

    /// Returns whether a valid key currently holds a value.
    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        Ok(self.backend.value_len(key).map_err(persistence)?.is_some())
    }

    /// Stores a value and commits it.
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let param = keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        if value.len() > param.max_len() {
            return Err(StoreError::ValueTooLong);
        }
        if self.backend.write(key, value).is_err() {
            warn!("Storage write failed for {}", key);
            self.backend.rollback();
            return Err(StoreError::Persistence);
        }
        self.commit(key)
    }

    /// Decodes hexadecimal input, given as consecutive chunks, and stores the
    /// resulting bytes. Returns the decoded length.
    ///
    /// Nothing is written when the input is not valid hex.
    pub fn set_hex<I, T>(&mut self, key: &str, hex_chunks: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        let mut decoded: Vec<u8, { keys::BINARY_VALUE_MAX }> = Vec::new();
        hex::decode_chunks_into(hex_chunks, &mut decoded)?;
        let len = decoded.len();
        let result = self.set(key, &decoded);
        decoded.as_mut_slice().zeroize();
        result.map(|()| len)
    }

    /// Removes a parameter and commits the removal.
    pub fn erase(&mut self, key: &str) -> Result<(), StoreError> {
        keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        match self.backend.erase(key) {
            Ok(true) => self.commit(key),
            Ok(false) => Err(StoreError::NotFound),
            Err(_) => {
                self.backend.rollback();
                Err(StoreError::Persistence)
            }
        }
    }

    /// Removes every parameter in the namespace.
    pub fn erase_all(&mut self) -> Result<(), StoreError> {
        if self.backend.erase_all().is_err() {
            self.backend.rollback();
            return Err(StoreError::Persistence);
        }
        self.commit("*")
    }

    /// Lazily walks the stored `(key, value length)` pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.backend.entries()
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Reads any valid key, write-only ones included.
    ///
    /// Reserved for the session, which needs secrets to authenticate.
    pub(crate) fn load<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, StoreError> {
        keys::lookup(key).ok_or(StoreError::InvalidKey)?;
        self.read_raw(key, buf)
    }

    fn read_raw<'b>(&self, key: &str, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, StoreError> {
        match self.backend.read(key, buf).map_err(persistence)? {
            Some(len) if len > buf.len() => Err(StoreError::ValueTooLong),
            Some(len) => Ok(Some(&buf[..len])),
            None => Ok(None),
        }
    }

    fn commit(&mut self, key: &str) -> Result<(), StoreError> {
        if self.backend.commit().is_err() {
            error!("Storage commit failed for {}", key);
            self.backend.rollback();
            return Err(StoreError::Persistence);
        }
        debug!("Committed {}", key);
        Ok(())
    }
}

impl<M: RawMutex, B: StorageBackend> Drop for StoreGuard<'_, M, B> {
    fn drop(&mut self) {
        self.backend.rollback();
    }
}

fn persistence<E>(_: E) -> StoreError {
    StoreError::Persistence
}
