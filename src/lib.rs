//! # Secure Telemetry Uplink for Embedded Nodes
//!
//! `espnode-uplink` is a `no_std` library that gets a microcontroller from a
//! blank parameter store to publishing telemetry over MQTT on a TLS 1.3
//! connection, built upon the [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Buffers are managed using `heapless` and fixed-size
//!   arrays. Nothing is heap-allocated.
//! - **Fully Async:** Built with `async/await` on Embassy timers, sync primitives and
//!   networking. Rust 2024 native `async fn` in traits, no `async-trait`.
//! - **Credential Store:** Broker endpoint, login and TLS material live in a
//!   namespaced key/value store (`wifi.*`, `mqtt.*`, `ssl.*`) behind a
//!   `StorageBackend` trait. SSL material is write-only.
//! - **Operator Commands:** A small command shell (`wifi`, `mqtt`, `ssl`, `list`,
//!   `clear`, `client_id`) for provisioning over a serial console, including hex
//!   capture of certificates.
//! - **TLS 1.3 Session:** Server verification against a stored CA (required,
//!   optional or disabled), optional client certificate, PEM or DER material.
//! - **MQTT 3.1.1, QoS 0 & 1:** CONNECT, PUBLISH with PUBACK matching, keep-alive
//!   pings and DISCONNECT over any `MqttTransport`.
//!
//! ## Architecture
//!
//! ### 1. Direct Client Usage
//!
//! Use `MqttClient` directly over any stream:
//!
//! ```ignore
//! let transport = StreamTransport::new(stream, DEFAULT_READ_TIMEOUT);
//! let mut client = MqttClient::<_, 512>::new(transport, MqttOptions::new(client_id.as_str()));
//! client.connect().await?;
//! client.publish("test", b"payload", QoS::AtLeastOnce).await?;
//! ```
//!
//! ### 2. Full Uplink
//!
//! `Uplink` loads the credentials, opens the TLS session and runs a
//! `TelemetryModule` on a fixed cadence:
//!
//! ```ignore
//! static STORE: ConfigStore<CriticalSectionRawMutex, FlashBackend> = ConfigStore::new(FlashBackend::new());
//!
//! let mut connector: EmbassyConnector<'_> = EmbassyConnector::new(stack);
//! let mut uplink = Uplink::<_, 4>::new(client_id, HeartbeatModule::default());
//! uplink.run(&STORE, &mut trng, &mut connector, &mut tls_buffers).await?;
//! ```
//!
//! The operator shell shares the same store:
//!
//! ```ignore
//! let shell = CommandShell::new(&STORE, client_id);
//! shell.execute_line("mqtt hostname broker.example.com", &mut uart_rx, &mut console).await?;
//! ```

#![cfg_attr(not(test), no_std)]

// This must go first so the macros are visible to every other module.
#[macro_use]
mod fmt;

pub mod client;
pub mod command;
pub mod error;
pub mod identity;
pub mod packet;
pub mod runtime;
pub mod session;
pub mod store;
pub mod transport;
pub mod util;

#[cfg(test)]
mod test_util;

// Re-export key types for easier access at the crate root.
pub use client::{AckPolicy, MqttClient, MqttOptions, PublishOutcome};
pub use command::CommandShell;
pub use error::{CommandError, MqttError, SessionError, StoreError, UplinkError};
pub use identity::ClientId;
pub use packet::QoS;
pub use runtime::{HeartbeatModule, TelemetryModule, Uplink, UplinkConfig};
pub use session::{EmbassyConnector, SessionCredentials, SessionOptions, TlsBuffers, VerifyMode};
pub use store::{ConfigStore, MemoryBackend, StorageBackend};
pub use transport::{MqttTransport, StreamTransport};
