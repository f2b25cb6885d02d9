//! Randomness for the TLS handshake.
//!
//! A ChaCha20 generator is seeded from hardware entropy mixed with a
//! personalization string (the device's client id), so two devices that draw
//! the same entropy still produce different streams.

use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Number of entropy bytes drawn when seeding.
pub const ENTROPY_LEN: usize = 32;

/// Cryptographically secure generator used by a single session.
pub struct SessionRng {
    inner: ChaCha20Rng,
}

impl SessionRng {
    /// Seeds a generator from `entropy`, personalized with `personalization`.
    pub fn new<E: RngCore>(entropy: &mut E, personalization: &[u8]) -> Self {
        let mut material = [0u8; ENTROPY_LEN];
        entropy.fill_bytes(&mut material);
        let rng = Self::from_entropy(&material, personalization);
        material.zeroize();
        rng
    }

    /// Seeds a generator from already collected entropy.
    pub fn from_entropy(entropy: &[u8; ENTROPY_LEN], personalization: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entropy);
        hasher.update(personalization);
        let mut seed: [u8; 32] = hasher.finalize().into();
        let inner = ChaCha20Rng::from_seed(seed);
        seed.zeroize();
        Self { inner }
    }
}

impl RngCore for SessionRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

impl CryptoRng for SessionRng {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rng: &mut SessionRng) -> [u8; 16] {
        let mut out = [0u8; 16];
        rng.fill_bytes(&mut out);
        out
    }

    #[test]
    fn same_inputs_give_the_same_stream() {
        let entropy = [7u8; ENTROPY_LEN];
        let mut a = SessionRng::from_entropy(&entropy, b"ESP-A0B1C2D3E4F5");
        let mut b = SessionRng::from_entropy(&entropy, b"ESP-A0B1C2D3E4F5");
        assert_eq!(sample(&mut a), sample(&mut b));
    }

    #[test]
    fn personalization_separates_devices() {
        let entropy = [7u8; ENTROPY_LEN];
        let mut a = SessionRng::from_entropy(&entropy, b"ESP-A0B1C2D3E4F5");
        let mut b = SessionRng::from_entropy(&entropy, b"ESP-A0B1C2D3E4F6");
        assert_ne!(sample(&mut a), sample(&mut b));
    }

    #[test]
    fn draws_entropy_from_the_source() {
        let mut source = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let mut a = SessionRng::new(&mut source, b"id");
        let mut b = SessionRng::new(&mut source, b"id");
        assert_ne!(sample(&mut a), sample(&mut b));
    }
}
