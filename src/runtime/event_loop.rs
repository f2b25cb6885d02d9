//! Fixed-cadence publish loop.

use core::future::Future;
use core::pin::pin;

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use super::publisher::{CycleOutbox, TelemetryReceiver};
use super::traits::TelemetryModule;
use crate::client::{AckPolicy, MqttClient, PublishOutcome};
use crate::error::MqttError;
use crate::packet::QoS;
use crate::transport::MqttTransport;

/// Time between publish cycles.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

const OUTBOX_CAPACITY: usize = 8;
const OUTBOX_TOPIC_SIZE: usize = 64;
const OUTBOX_PAYLOAD_SIZE: usize = 256;

type TickOutbox = CycleOutbox<OUTBOX_CAPACITY, OUTBOX_TOPIC_SIZE, OUTBOX_PAYLOAD_SIZE>;

/// Runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Pause between the end of one publish cycle and the start of the next.
    pub publish_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

/// Running totals of publish outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PublishStats {
    /// Publishes written to the transport.
    pub sent: u32,
    /// QoS 1 publishes acknowledged with the matching packet id.
    pub acknowledged: u32,
    /// QoS 1 publishes answered with a wrong id or an unexpected packet.
    pub anomalies: u32,
}

/// Drives a connected `MqttClient`: each cycle the module's telemetry and any
/// queued requests are published, then the loop sleeps for the publish
/// interval.
///
/// Publishing is fire-and-continue under `AckPolicy::BestEffort`: acknowledgement
/// anomalies are counted and the loop moves on. Under `AckPolicy::Strict` the
/// first anomaly is counted and then ends the loop with its protocol error.
/// Errors that leave the connection unusable always stop it.
pub struct MqttRuntime<'a, 'q, T, M, const BUF_SIZE: usize, const OUTBOX_DEPTH: usize>
where
    T: MqttTransport,
    M: TelemetryModule,
{
    client: MqttClient<'a, T, BUF_SIZE>,
    module: M,
    requests: Option<TelemetryReceiver<'q, OUTBOX_DEPTH>>,
    options: RuntimeOptions,
    stats: PublishStats,
}

impl<'a, 'q, T, M, const BUF_SIZE: usize, const OUTBOX_DEPTH: usize>
    MqttRuntime<'a, 'q, T, M, BUF_SIZE, OUTBOX_DEPTH>
where
    T: MqttTransport,
    M: TelemetryModule,
{
    pub fn new(client: MqttClient<'a, T, BUF_SIZE>, module: M, options: RuntimeOptions) -> Self {
        Self {
            client,
            module,
            requests: None,
            options,
            stats: PublishStats::default(),
        }
    }

    /// Also publishes requests queued through a `TelemetryHandle`.
    pub fn with_requests(mut self, requests: TelemetryReceiver<'q, OUTBOX_DEPTH>) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn client(&self) -> &MqttClient<'a, T, BUF_SIZE> {
        &self.client
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    pub fn into_client(self) -> MqttClient<'a, T, BUF_SIZE> {
        self.client
    }

    /// Connects if needed, then runs `on_start` and publishes its output.
    pub async fn start(&mut self) -> Result<(), MqttError<T::Error>> {
        if !self.client.is_connected() {
            self.client.connect().await?;
        }
        let mut outbox = TickOutbox::new();
        self.module.on_start(&mut outbox);
        self.flush(&mut outbox).await
    }

    /// Runs one publish cycle.
    pub async fn tick(&mut self) -> Result<(), MqttError<T::Error>> {
        let mut outbox = TickOutbox::new();
        self.module.on_tick(&mut outbox);
        self.flush(&mut outbox).await?;

        while let Some(request) = self.requests.as_ref().and_then(|rx| rx.try_receive().ok()) {
            self.publish(request.topic, request.payload, request.qos).await?;
        }

        if self.client.needs_ping() {
            self.client.ping().await?;
        }
        Ok(())
    }

    /// Starts and publishes on a fixed cadence until the connection fails.
    pub async fn run(&mut self) -> Result<(), MqttError<T::Error>> {
        self.run_until(core::future::pending()).await
    }

    /// Like `run`, but returns `Ok` once `stop` completes.
    ///
    /// `stop` is only observed between cycles; a cycle in progress is finished.
    pub async fn run_until<F>(&mut self, stop: F) -> Result<(), MqttError<T::Error>>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Publishing every {} ms", self.options.publish_interval.as_millis());

        let mut stop = pin!(stop);
        loop {
            self.tick().await?;
            match select(stop.as_mut(), Timer::after(self.options.publish_interval)).await {
                Either::First(()) => {
                    info!("Publish loop stopped");
                    return Ok(());
                }
                Either::Second(()) => {}
            }
        }
    }

    async fn flush(&mut self, outbox: &mut TickOutbox) -> Result<(), MqttError<T::Error>> {
        for request in outbox.drain() {
            self.publish(&request.topic, &request.payload, request.qos).await?;
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), MqttError<T::Error>> {
        match self.client.publish(topic, payload, qos).await {
            Ok(outcome) => {
                self.stats.sent += 1;
                match outcome {
                    PublishOutcome::Sent => {}
                    PublishOutcome::Acknowledged(_) => self.stats.acknowledged += 1,
                    PublishOutcome::Mismatched { .. }
                    | PublishOutcome::Unexpected(_)
                    | PublishOutcome::Malformed(_) => self.stats.anomalies += 1,
                }
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                self.stats.sent += 1;
                self.stats.anomalies += 1;
                match self.client.options().ack_policy() {
                    AckPolicy::BestEffort => {
                        warn!("Publish to {} not acknowledged, continuing", topic);
                        Ok(())
                    }
                    AckPolicy::Strict => {
                        error!("Publish to {} not acknowledged, stopping", topic);
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}
