//! Telemetry producers.
//!
//! A `TelemetryModule` is called synchronously once per publish cycle and
//! writes its messages into a `PublishOutbox`; the runtime does the network I/O
//! after the callback returns. The trait is dyn-compatible, so an Embassy task
//! can take `&mut dyn TelemetryModule` instead of a generic parameter.

use crate::packet::QoS;

/// Where a module leaves the messages of one callback.
///
/// ```ignore
/// outbox.publish("node/battery", b"3.71", QoS::AtMostOnce);
/// ```
pub trait PublishOutbox {
    /// Copies the message for publishing once the callback returns.
    ///
    /// Never blocks. `false` means the message was rejected and will not be sent.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> bool;
}

/// Object-safe trait for modules that produce telemetry on a fixed cadence.
///
/// # Example
///
/// ```ignore
/// struct Uptime {
///     seconds: u32,
/// }
///
/// impl TelemetryModule for Uptime {
///     fn on_tick(&mut self, outbox: &mut dyn PublishOutbox) {
///         self.seconds += 5;
///         outbox.publish("device/uptime", &self.seconds.to_be_bytes(), QoS::AtMostOnce);
///     }
/// }
/// ```
pub trait TelemetryModule {
    /// Called once after the broker accepted the connection.
    ///
    /// The default implementation does nothing.
    fn on_start(&mut self, _outbox: &mut dyn PublishOutbox) {}

    /// Called once per publish cycle.
    fn on_tick(&mut self, outbox: &mut dyn PublishOutbox);
}

/// A module that publishes nothing.
///
/// Useful when all telemetry arrives through a `TelemetryHandle`.
pub struct NoopModule;

impl TelemetryModule for NoopModule {
    fn on_tick(&mut self, _outbox: &mut dyn PublishOutbox) {}
}

/// Runs two modules as one; `first` always publishes before `second`.
///
/// ```ignore
/// let module = ModulePair::new(HeartbeatModule::default(), Uptime { seconds: 0 });
/// ```
pub struct ModulePair<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> ModulePair<A, B> {
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: TelemetryModule, B: TelemetryModule> TelemetryModule for ModulePair<A, B> {
    fn on_start(&mut self, outbox: &mut dyn PublishOutbox) {
        self.first.on_start(outbox);
        self.second.on_start(outbox);
    }

    fn on_tick(&mut self, outbox: &mut dyn PublishOutbox) {
        self.first.on_tick(outbox);
        self.second.on_tick(outbox);
    }
}

// Lets `&mut dyn TelemetryModule` stand in for an owned module.
impl<M: TelemetryModule + ?Sized> TelemetryModule for &mut M {
    fn on_start(&mut self, outbox: &mut dyn PublishOutbox) {
        M::on_start(self, outbox)
    }

    fn on_tick(&mut self, outbox: &mut dyn PublishOutbox) {
        M::on_tick(self, outbox)
    }
}
