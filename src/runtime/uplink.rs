//! Full uplink bring-up: credentials, secure session, MQTT connection and the
//! publish loop, in that order.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use embedded_io_async::{Read, Write};
use embedded_tls::TlsError;
use rand_core::RngCore;

use super::event_loop::{MqttRuntime, PublishStats, RuntimeOptions};
use super::publisher::TelemetryReceiver;
use super::traits::TelemetryModule;
use crate::client::{AckPolicy, DEFAULT_KEEP_ALIVE, MqttClient, MqttOptions};
use crate::error::{MqttError, UplinkError};
use crate::identity::ClientId;
use crate::session::{
    Connector, PeerTrust, SessionCredentials, SessionHandler, SessionOptions, SessionRng, TlsBuffers,
    TlsStream, run_session,
};
use crate::store::{ConfigStore, StorageBackend};
use crate::transport::{LinkError, StreamTransport};

/// Working buffer of the MQTT engine; bounds the largest packet in either direction.
pub const MQTT_BUFFER_LEN: usize = 512;

/// Everything that tunes an uplink run apart from the stored credentials.
#[derive(Debug, Clone, Copy)]
pub struct UplinkConfig {
    pub session: SessionOptions,
    pub runtime: RuntimeOptions,
    pub keep_alive: Duration,
    pub ack_policy: AckPolicy,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            runtime: RuntimeOptions::default(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            ack_policy: AckPolicy::default(),
        }
    }
}

/// Stop request for a running uplink, observed between publish cycles.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// One device uplink.
///
/// ```ignore
/// static STOP: StopSignal = Signal::new();
///
/// let mut uplink = Uplink::<_, 4>::new(client_id, HeartbeatModule::default())
///     .with_stop(&STOP);
/// let stats = uplink.run(&STORE, &mut trng, &mut connector, &mut buffers).await?;
/// ```
pub struct Uplink<'u, M: TelemetryModule, const OUTBOX_DEPTH: usize> {
    client_id: ClientId,
    module: M,
    requests: Option<TelemetryReceiver<'u, OUTBOX_DEPTH>>,
    config: UplinkConfig,
    stop: Option<&'u StopSignal>,
}

impl<'u, M: TelemetryModule, const OUTBOX_DEPTH: usize> Uplink<'u, M, OUTBOX_DEPTH> {
    pub fn new(client_id: ClientId, module: M) -> Self {
        Self {
            client_id,
            module,
            requests: None,
            config: UplinkConfig::default(),
            stop: None,
        }
    }

    pub fn with_config(mut self, config: UplinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Also publishes requests queued through a `TelemetryHandle`.
    pub fn with_requests(mut self, requests: TelemetryReceiver<'u, OUTBOX_DEPTH>) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Ends the run cleanly once `stop` is signalled.
    pub fn with_stop(mut self, stop: &'u StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Loads the credentials, brings up the TLS session and publishes until
    /// the connection fails or a stop is signalled.
    ///
    /// The store is only held while the credentials are read. `entropy` seeds
    /// the session generator, personalized with the client id.
    pub async fn run<Mx, B, E, C, const READ: usize, const WRITE: usize>(
        &mut self,
        store: &ConfigStore<Mx, B>,
        entropy: &mut E,
        connector: &mut C,
        buffers: &mut TlsBuffers<READ, WRITE>,
    ) -> Result<PublishStats, UplinkError>
    where
        Mx: RawMutex,
        B: StorageBackend,
        E: RngCore,
        C: Connector,
    {
        let credentials = {
            let guard = store.open().await;
            SessionCredentials::load(&guard)?
        };
        let mut rng = SessionRng::new(entropy, self.client_id.as_str().as_bytes());

        let mut engine = Engine {
            client_id: self.client_id.as_str(),
            credentials: &credentials,
            module: &mut self.module,
            requests: self.requests,
            config: &self.config,
            stop: self.stop,
        };
        let stats = run_session(connector, &credentials, &mut rng, buffers, &self.config.session, &mut engine).await??;
        info!(
            "Uplink finished: {} sent, {} acknowledged, {} anomalies",
            stats.sent, stats.acknowledged, stats.anomalies
        );
        Ok(stats)
    }
}

struct Engine<'h, 'u, M, const OUTBOX_DEPTH: usize> {
    client_id: &'h str,
    credentials: &'h SessionCredentials,
    module: &'h mut M,
    requests: Option<TelemetryReceiver<'u, OUTBOX_DEPTH>>,
    config: &'h UplinkConfig,
    stop: Option<&'u StopSignal>,
}

impl<M: TelemetryModule, const OUTBOX_DEPTH: usize> SessionHandler for Engine<'_, '_, M, OUTBOX_DEPTH> {
    type Output = Result<PublishStats, MqttError<LinkError<TlsError>>>;

    async fn on_session<S: Read + Write>(&mut self, stream: TlsStream<'_, S>, trust: PeerTrust) -> Self::Output {
        if trust == PeerTrust::Unverified {
            warn!("Publishing over an unverified session");
        }

        let mut options = MqttOptions::new(self.client_id)
            .with_keep_alive(self.config.keep_alive)
            .with_ack_policy(self.config.ack_policy);
        if let Some(username) = self.credentials.username() {
            options = options.with_credentials(username, self.credentials.password());
        }

        let transport = StreamTransport::new(stream, self.config.session.read_timeout);
        let client: MqttClient<'_, _, MQTT_BUFFER_LEN> = MqttClient::new(transport, options);
        let mut runtime = MqttRuntime::new(client, &mut *self.module, self.config.runtime);
        if let Some(requests) = self.requests {
            runtime = runtime.with_requests(requests);
        }

        let result = match self.stop {
            Some(stop) => runtime.run_until(stop.wait()).await,
            None => runtime.run().await,
        };
        let stats = runtime.stats();

        let mut client = runtime.into_client();
        if client.is_connected() {
            if let Err(e) = client.disconnect().await {
                warn!("DISCONNECT failed: {:?}", e);
            }
        }
        if let Err((_, e)) = client.into_transport().into_inner().close().await {
            warn!("TLS close failed: {:?}", e);
        }

        result.map(|()| stats)
    }
}
