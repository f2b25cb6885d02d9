//! Telemetry Runtime
//!
//! Drives a connected MQTT client on a fixed cadence.
//!
//! # Overview
//!
//! Each cycle the runtime asks its `TelemetryModule` for messages, publishes
//! them together with anything other tasks queued through a
//! `TelemetryHandle`, keeps the connection alive and sleeps until the next
//! cycle. `Uplink` wraps all of this with credential loading and the TLS
//! session, so firmware only needs a store, an entropy source and a network
//! stack.
//!
//! # Object-Safe Design
//!
//! `TelemetryModule` is dyn-compatible, so `&mut dyn TelemetryModule` can be
//! handed to an Embassy task without generic parameters on the task function.
//!
//! # Publishing Pattern
//!
//! Modules never perform async I/O directly. Instead, they use the `PublishOutbox`
//! trait to queue publish requests. The runtime then performs the actual async
//! publishing after the module method returns.

pub(crate) mod event_loop;
pub(crate) mod heartbeat;
pub(crate) mod publisher;
pub(crate) mod traits;
pub(crate) mod uplink;

pub use event_loop::{DEFAULT_PUBLISH_INTERVAL, MqttRuntime, PublishStats, RuntimeOptions};
pub use heartbeat::{HEARTBEAT_TOPIC, HeartbeatModule};
pub use publisher::{
    CycleOutbox, PendingPublish, QueuedTelemetry, TelemetryHandle, TelemetryQueue, TelemetryReceiver,
    TelemetrySender,
};
pub use traits::{ModulePair, NoopModule, PublishOutbox, TelemetryModule};
pub use uplink::{MQTT_BUFFER_LEN, StopSignal, Uplink, UplinkConfig};
