//! # Transport Session
//!
//! Builds the authenticated, encrypted byte stream the MQTT engine runs over.
//!
//! Bring-up loads the broker endpoint and trust material from the credential
//! store (`SessionCredentials`), seeds a `SessionRng` personalized with the
//! client id, opens a TCP connection through a `Connector` and runs the
//! TLS 1.3 handshake. The established stream is handed to a `SessionHandler`,
//! which owns it until the session ends.
//!
//! ## Verification
//!
//! `VerifyMode::Required` (the default) refuses to start without a CA
//! certificate and fails on any verification error. `VerifyMode::Optional`
//! verifies when a CA is configured; if the server certificate does not
//! verify, the failure is reported and the session is dialled again without
//! verification. `VerifyMode::Disabled` never verifies.

pub mod credentials;
pub mod crypto;
pub mod rng;
pub mod socket;

use embassy_time::Duration;
use embedded_io_async::{Read, Write};
use embedded_tls::webpki::CertVerifier;
use embedded_tls::{
    Aes128GcmSha256, Certificate, NoVerify, TlsConfig, TlsConnection, TlsContext, TlsError,
};
use rand_core::CryptoRngCore;

use crate::error::{ConnectError, SessionError};
use crate::store::keys::SSL_CA_CERT;
use crate::transport::DEFAULT_READ_TIMEOUT;

pub use credentials::SessionCredentials;
pub use crypto::{SessionProvider, UnixClock, set_unix_time};
pub use rng::SessionRng;
pub use socket::EmbassyConnector;

/// Size of each TLS record buffer: a full 16 KiB record plus overhead.
pub const TLS_RECORD_BUFFER_LEN: usize = 16640;

/// Largest server certificate the verifier accepts.
const CERT_VERIFY_BUFFER: usize = 4096;

/// The TLS connection type every session produces.
pub type TlsStream<'a, S> = TlsConnection<'a, S, Aes128GcmSha256>;

/// How the server certificate is checked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VerifyMode {
    /// A CA certificate must be configured and the server must verify against it.
    #[default]
    Required,
    /// Verify when possible; report failures and continue unverified.
    Optional,
    /// Never verify the server.
    Disabled,
}

/// Whether the peer of an established session was verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerTrust {
    Verified,
    Unverified,
}

/// Session configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub verify: VerifyMode,
    /// Longest wait for any single read once the session is up.
    pub read_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify: VerifyMode::Required,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// TLS record buffers, borrowed by the connection for its whole lifetime.
pub struct TlsBuffers<const READ: usize = TLS_RECORD_BUFFER_LEN, const WRITE: usize = TLS_RECORD_BUFFER_LEN> {
    read: [u8; READ],
    write: [u8; WRITE],
}

impl<const READ: usize, const WRITE: usize> TlsBuffers<READ, WRITE> {
    pub const fn new() -> Self {
        Self {
            read: [0; READ],
            write: [0; WRITE],
        }
    }
}

impl<const READ: usize, const WRITE: usize> Default for TlsBuffers<READ, WRITE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens the byte stream the TLS session runs over.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Socket<'s>: Read + Write
    where
        Self: 's;

    /// Resolves `host` and connects to it on `port`.
    async fn connect(&mut self, host: &str, port: u16) -> Result<Self::Socket<'_>, ConnectError>;
}

/// Takes over an established session.
#[allow(async_fn_in_trait)]
pub trait SessionHandler {
    type Output;

    async fn on_session<S: Read + Write>(&mut self, stream: TlsStream<'_, S>, trust: PeerTrust) -> Self::Output;
}

/// Connects to the broker, completes the TLS handshake and runs `handler` on
/// the resulting stream.
///
/// Fails before any network I/O when verification is required and no CA
/// certificate is configured.
pub async fn run_session<C, R, H, const READ: usize, const WRITE: usize>(
    connector: &mut C,
    credentials: &SessionCredentials,
    rng: &mut R,
    buffers: &mut TlsBuffers<READ, WRITE>,
    options: &SessionOptions,
    handler: &mut H,
) -> Result<H::Output, SessionError>
where
    C: Connector,
    R: CryptoRngCore,
    H: SessionHandler,
{
    let verify = initial_verification(options.verify, credentials.ca_cert().is_some())?;
    dial_with_fallback(options.verify, verify, async |verify| {
        attempt(&mut *connector, credentials, &mut *rng, &mut *buffers, verify, &mut *handler).await
    })
    .await
}

/// Decides whether the first handshake verifies the server.
fn initial_verification(mode: VerifyMode, has_ca: bool) -> Result<bool, SessionError> {
    match (mode, has_ca) {
        (VerifyMode::Disabled, _) => {
            warn!("Server certificate verification is disabled");
            Ok(false)
        }
        (VerifyMode::Required, false) => {
            error!("Server verification is required but {} is not set", SSL_CA_CERT);
            Err(SessionError::MissingTrustAnchor)
        }
        (VerifyMode::Optional, false) => {
            warn!("No CA certificate configured, the server will not be verified");
            Ok(false)
        }
        (_, true) => Ok(true),
    }
}

/// Runs `dial`, and in optional mode dials once more without verification
/// when the server certificate is rejected.
async fn dial_with_fallback<T, F>(mode: VerifyMode, verify: bool, mut dial: F) -> Result<T, SessionError>
where
    F: AsyncFnMut(bool) -> Result<T, SessionError>,
{
    let first = dial(verify).await;
    match first {
        Err(e) if verify && mode == VerifyMode::Optional && e.is_verification_failure() => {
            warn!("Unable to verify the server's certificate, continuing without verification");
            dial(false).await
        }
        other => other,
    }
}

/// Trust and identity material presented by one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandshakeMaterial<'c> {
    ca: Option<&'c [u8]>,
    identity: Option<(&'c [u8], &'c [u8])>,
}

impl<'c> HandshakeMaterial<'c> {
    fn select(credentials: &'c SessionCredentials, verify: bool) -> Self {
        Self {
            ca: credentials.ca_cert().filter(|_| verify),
            identity: credentials.client_identity(),
        }
    }
}

fn peer_trust(verify: bool) -> PeerTrust {
    if verify { PeerTrust::Verified } else { PeerTrust::Unverified }
}

async fn attempt<C, R, H, const READ: usize, const WRITE: usize>(
    connector: &mut C,
    credentials: &SessionCredentials,
    rng: &mut R,
    buffers: &mut TlsBuffers<READ, WRITE>,
    verify: bool,
    handler: &mut H,
) -> Result<H::Output, SessionError>
where
    C: Connector,
    R: CryptoRngCore,
    H: SessionHandler,
{
    let host = credentials.hostname();
    let port = credentials.port();
    info!("Connecting to {}:{}", host, port);
    let socket = connector.connect(host, port).await?;

    let material = HandshakeMaterial::select(credentials, verify);
    let mut config = TlsConfig::new().with_server_name(host);
    if let Some(ca) = material.ca {
        config = config.with_ca(Certificate::X509(ca));
    }
    if let Some((cert, key)) = material.identity {
        debug!("Presenting client certificate");
        config = config.with_cert(Certificate::X509(cert)).with_priv_key(key);
    }

    let mut tls: TlsStream<'_, _> = TlsConnection::new(socket, &mut buffers.read, &mut buffers.write);
    debug!("Starting TLS negotiation");
    let opened = if verify {
        let verifier = CertVerifier::<Aes128GcmSha256, UnixClock, CERT_VERIFY_BUFFER>::new();
        tls.open(TlsContext::new(&config, SessionProvider::new(rng, verifier))).await
    } else {
        tls.open(TlsContext::new(&config, SessionProvider::new(rng, NoVerify))).await
    };
    if let Err(e) = opened {
        return Err(classify(e, verify));
    }

    info!("TLS session established with TLS_AES_128_GCM_SHA256");
    Ok(handler.on_session(tls, peer_trust(verify)).await)
}

fn classify(err: TlsError, verify: bool) -> SessionError {
    match err {
        TlsError::InvalidCertificate | TlsError::InvalidSignature if verify => {
            error!("Server certificate verification failed: {:?}", err);
            SessionError::Verification(err)
        }
        _ => {
            error!("TLS handshake failed: {:?}", err);
            SessionError::Handshake(err)
        }
    }
}
