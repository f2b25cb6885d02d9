//! Provisioning through the command shell, then publishing with the stored
//! credentials over an in-memory stream.

use core::convert::Infallible;
use std::collections::VecDeque;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use espnode_uplink::client::ConnectionState;
use espnode_uplink::{
    ClientId, CommandShell, ConfigStore, MemoryBackend, MqttClient, MqttOptions, PublishOutcome, QoS,
    SessionCredentials, StreamTransport,
};

type Store = ConfigStore<NoopRawMutex, MemoryBackend<12, 512>>;

/// Serves scripted broker replies and records everything written.
#[derive(Default)]
struct ScriptedBroker {
    replies: VecDeque<u8>,
    written: Vec<u8>,
}

impl ScriptedBroker {
    fn new(replies: &[u8]) -> Self {
        Self {
            replies: replies.iter().copied().collect(),
            written: Vec::new(),
        }
    }
}

impl ErrorType for ScriptedBroker {
    type Error = Infallible;
}

impl Read for ScriptedBroker {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.replies.len());
        for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedBroker {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn client_id() -> ClientId {
    ClientId::from_mac(&[0x24, 0x6F, 0x28, 0x01, 0x02, 0x03])
}

fn provision(store: &Store, lines: &[&str]) -> String {
    let shell = CommandShell::new(store, client_id());
    let mut console = String::new();
    let mut input = ScriptedBroker::default();
    for line in lines {
        block_on(shell.execute_line(line, &mut input, &mut console)).unwrap();
    }
    console
}

fn load(store: &Store) -> SessionCredentials {
    let guard = block_on(store.open());
    SessionCredentials::load(&guard).unwrap()
}

#[test]
fn provisioned_credentials_reach_the_session() {
    let store = Store::new(MemoryBackend::new());
    let console = provision(
        &store,
        &[
            "mqtt hostname broker.example.com",
            "mqtt port 8883",
            "mqtt username sensor",
            "mqtt password s3cret",
            "ssl ca_cert 3003 0201 01",
            "ssl client_cert 3000",
            "ssl client_cert?",
        ],
    );
    assert!(console.ends_with("ssl.client_cert: is set\n"));
    assert!(!console.contains("s3cret"));

    let credentials = load(&store);
    assert_eq!(credentials.hostname(), "broker.example.com");
    assert_eq!(credentials.port(), 8883);
    assert_eq!(credentials.username(), Some("sensor"));
    assert_eq!(credentials.password(), Some(&b"s3cret"[..]));
    assert_eq!(credentials.ca_cert(), Some(&[0x30, 0x03, 0x02, 0x01, 0x01][..]));
    // a certificate without its key is not an identity
    assert!(credentials.client_identity().is_none());
}

#[test]
fn client_id_command_matches_the_connect_identifier() {
    let store = Store::new(MemoryBackend::new());
    let console = provision(&store, &["client_id"]);
    assert_eq!(console, "client-id: ESP-246F28010203\n");
    assert_eq!(client_id().as_str(), "ESP-246F28010203");
}

#[test]
fn stored_login_is_sent_and_publish_is_acknowledged() {
    let store = Store::new(MemoryBackend::new());
    provision(
        &store,
        &["mqtt hostname broker.example.com", "mqtt port 8883", "mqtt username sensor", "mqtt password pw"],
    );
    let credentials = load(&store);
    let id = client_id();

    let mut options = MqttOptions::new(id.as_str());
    if let Some(username) = credentials.username() {
        options = options.with_credentials(username, credentials.password());
    }

    // CONNACK accepted, then PUBACK for packet id 1
    let broker = ScriptedBroker::new(&[0x20, 0x02, 0x00, 0x00, 0x40, 0x02, 0x00, 0x01]);
    let transport = StreamTransport::new(broker, Duration::from_secs(1));
    let mut client: MqttClient<'_, _, 256> = MqttClient::new(transport, options);

    let connack = block_on(client.connect()).unwrap();
    assert_eq!(connack.return_code, 0);
    let outcome = block_on(client.publish("test", b"Hello, World! 0", QoS::AtLeastOnce)).unwrap();
    assert_eq!(outcome, PublishOutcome::Acknowledged(1));
    block_on(client.disconnect()).unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let written = client.into_transport().into_inner().written;
    // CONNECT with username and password flags plus clean session
    assert_eq!(written[0], 0x10);
    assert_eq!(written[9], 0xC2);
    let connect_len = 2 + written[1] as usize;
    assert!(written[..connect_len].windows(6).any(|w| w == b"sensor"));
    assert!(written[..connect_len].windows(16).any(|w| w == b"ESP-246F28010203"));
    // PUBLISH QoS 1, then DISCONNECT
    assert_eq!(written[connect_len], 0x32);
    assert_eq!(&written[written.len() - 2..], &[0xE0, 0x00]);
}
