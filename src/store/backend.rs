//! Persistence backends for the credential store.

use core::fmt;

use heapless::{String, Vec};

use super::keys::MAX_KEY_LEN;

/// Transactional key/value storage, the equivalent of a flash NVS namespace.
///
/// Writes and erases are staged until `commit`. `rollback` discards whatever
/// was staged since the last successful commit. Reads observe staged changes.
pub trait StorageBackend {
    type Error: fmt::Debug;

    /// Length of the stored value, or `None` when the key is absent.
    fn value_len(&self, key: &str) -> Result<Option<usize>, Self::Error>;

    /// Copies the value into `buf` and returns its full length.
    ///
    /// When the value is longer than `buf` only a prefix is copied.
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Removes a key, returning whether it existed.
    fn erase(&mut self, key: &str) -> Result<bool, Self::Error>;

    fn erase_all(&mut self) -> Result<(), Self::Error>;

    fn commit(&mut self) -> Result<(), Self::Error>;

    fn rollback(&mut self);

    /// Lazily walks the stored `(key, value length)` pairs.
    fn entries(&self) -> impl Iterator<Item = (&str, usize)> + '_;
}

/// Failures of `MemoryBackend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryError {
    /// No free entry slot.
    Full,
    KeyTooLong,
    ValueTooLarge,
    /// Commit was made to fail with `fail_commits`.
    CommitFailed,
}

#[derive(Clone)]
struct Entry<const VALUE_CAP: usize> {
    key: String<MAX_KEY_LEN>,
    value: Vec<u8, VALUE_CAP>,
}

/// RAM-backed storage with the same commit semantics as flash.
///
/// Holds up to `ENTRIES` keys with values of at most `VALUE_CAP` bytes.
pub struct MemoryBackend<const ENTRIES: usize, const VALUE_CAP: usize> {
    committed: Vec<Entry<VALUE_CAP>, ENTRIES>,
    staged: Vec<Entry<VALUE_CAP>, ENTRIES>,
    fail_commits: bool,
    commits: usize,
}

impl<const ENTRIES: usize, const VALUE_CAP: usize> MemoryBackend<ENTRIES, VALUE_CAP> {
    pub const fn new() -> Self {
        Self {
            committed: Vec::new(),
            staged: Vec::new(),
            fail_commits: false,
            commits: 0,
        }
    }

    /// Makes every following commit fail until called with `false`.
    pub fn fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }

    fn find(&self, key: &str) -> Option<&Entry<VALUE_CAP>> {
        self.staged.iter().find(|e| e.key == key)
    }
}

impl<const ENTRIES: usize, const VALUE_CAP: usize> Default for MemoryBackend<ENTRIES, VALUE_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ENTRIES: usize, const VALUE_CAP: usize> StorageBackend for MemoryBackend<ENTRIES, VALUE_CAP> {
    type Error = MemoryError;

    fn value_len(&self, key: &str) -> Result<Option<usize>, Self::Error> {
        Ok(self.find(key).map(|e| e.value.len()))
    }

    fn read(&self, key: &str, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        Ok(self.find(key).map(|e| {
            let n = e.value.len().min(buf.len());
            buf[..n].copy_from_slice(&e.value[..n]);
            e.value.len()
        }))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        let value = Vec::from_slice(value).map_err(|_| MemoryError::ValueTooLarge)?;
        if let Some(entry) = self.staged.iter_mut().find(|e| e.key == key) {
            entry.value = value;
            return Ok(());
        }
        let key = String::try_from(key).map_err(|_| MemoryError::KeyTooLong)?;
        self.staged
            .push(Entry { key, value })
            .map_err(|_| MemoryError::Full)
    }

    fn erase(&mut self, key: &str) -> Result<bool, Self::Error> {
        match self.staged.iter().position(|e| e.key == key) {
            Some(index) => {
                self.staged.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        self.staged.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        if self.fail_commits {
            return Err(MemoryError::CommitFailed);
        }
        self.committed = self.staged.clone();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged = self.committed.clone();
    }

    fn entries(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.staged.iter().map(|e| (e.key.as_str(), e.value.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_changes_are_visible_until_rolled_back() {
        let mut backend: MemoryBackend<4, 16> = MemoryBackend::new();
        backend.write("mqtt.port", b"8883").unwrap();
        assert_eq!(backend.value_len("mqtt.port").unwrap(), Some(4));

        backend.rollback();
        assert_eq!(backend.value_len("mqtt.port").unwrap(), None);
    }

    #[test]
    fn committed_changes_survive_rollback() {
        let mut backend: MemoryBackend<4, 16> = MemoryBackend::new();
        backend.write("mqtt.port", b"8883").unwrap();
        backend.commit().unwrap();
        backend.write("mqtt.port", b"1883").unwrap();
        backend.rollback();

        let mut buf = [0u8; 8];
        assert_eq!(backend.read("mqtt.port", &mut buf).unwrap(), Some(4));
        assert_eq!(&buf[..4], b"8883");
        assert_eq!(backend.commits(), 1);
    }

    #[test]
    fn failed_commit_keeps_previous_state() {
        let mut backend: MemoryBackend<4, 16> = MemoryBackend::new();
        backend.fail_commits(true);
        backend.write("wifi.ssid", b"home").unwrap();
        assert_eq!(backend.commit(), Err(MemoryError::CommitFailed));
        backend.rollback();
        assert_eq!(backend.entries().count(), 0);
    }

    #[test]
    fn capacity_limits_are_reported() {
        let mut backend: MemoryBackend<1, 4> = MemoryBackend::new();
        assert_eq!(backend.write("a", b"12345"), Err(MemoryError::ValueTooLarge));
        backend.write("a", b"1").unwrap();
        assert_eq!(backend.write("b", b"1"), Err(MemoryError::Full));
        assert_eq!(backend.write("a_very_long_key_name", b"1"), Err(MemoryError::KeyTooLong));
    }
}
