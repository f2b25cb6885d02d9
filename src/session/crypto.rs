//! Crypto provider handed to the TLS engine.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use embedded_tls::TlsClock;
use embedded_tls::{Aes128GcmSha256, CryptoProvider, SignatureScheme, TlsError, TlsVerifier};
use p256::ecdsa::{DerSignature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use rand_core::CryptoRngCore;

/// Wall clock reference: Unix seconds at a known uptime, set once time is synced.
static WALL_CLOCK: Mutex<CriticalSectionRawMutex, Cell<Option<(u64, u64)>>> =
    Mutex::new(Cell::new(None));

/// Records the current Unix time, used to check certificate validity periods.
pub fn set_unix_time(seconds: u64) {
    let uptime = Instant::now().as_secs();
    WALL_CLOCK.lock(|clock| clock.set(Some((seconds, uptime))));
}

/// Certificate validity clock derived from the last `set_unix_time` call.
pub struct UnixClock;

impl TlsClock for UnixClock {
    fn now() -> Option<u64> {
        WALL_CLOCK
            .lock(|clock| clock.get())
            .map(|(unix, at)| unix + Instant::now().as_secs().saturating_sub(at))
    }
}

/// Supplies randomness, a certificate verifier and the client key signer.
pub struct SessionProvider<'r, R, V> {
    rng: &'r mut R,
    verifier: V,
}

impl<'r, R, V> SessionProvider<'r, R, V> {
    pub fn new(rng: &'r mut R, verifier: V) -> Self {
        Self { rng, verifier }
    }
}

impl<R, V> CryptoProvider for SessionProvider<'_, R, V>
where
    R: CryptoRngCore,
    V: TlsVerifier<Aes128GcmSha256>,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = DerSignature;

    fn rng(&mut self) -> impl CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(&mut self) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, TlsError> {
        Ok(&mut self.verifier)
    }

    fn signer(
        &mut self,
        key_der: &[u8],
    ) -> Result<(impl signature::SignerMut<Self::Signature>, SignatureScheme), TlsError> {
        let key = SecretKey::from_pkcs8_der(key_der)
            .or_else(|_| SecretKey::from_sec1_der(key_der))
            .map_err(|_| {
                error!("Client key is not a P-256 key in PKCS#8 or SEC1 form");
                TlsError::InvalidPrivateKey
            })?;
        Ok((SigningKey::from(&key), SignatureScheme::EcdsaSecp256r1Sha256))
    }
}
