//! # Parameter Commands
//!
//! The operator console surface: one `param`-style command per store domain
//! plus a few maintenance commands. Commands write human-readable output to
//! any `core::fmt::Write` sink and read raw input for binary capture from an
//! `embedded_io_async::Read` source. Line editing is left to the caller.
//!
//! ```ignore
//! let shell = CommandShell::new(&STORE, client_id);
//! let status = match shell.execute_line(line, &mut uart_rx, &mut console).await {
//!     Ok(()) => 0,
//!     Err(e) => e.exit_code(),
//! };
//! ```

pub mod capture;
mod param;

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;
use embedded_io_async::Read;
use heapless::Vec;

use crate::error::CommandError;
use crate::identity::ClientId;
use crate::store::{ConfigStore, Domain, StorageBackend};

pub use capture::DEFAULT_CAPTURE_TIMEOUT;
pub use param::join_tokens;

/// Most tokens accepted on one command line.
pub const MAX_ARGS: usize = 16;

const HELP: &str = "Available commands:
  wifi <param> [<value>] -- Set wifi <param> (one of ssid, bssid, password) to <value>, omit <value> to clear
  wifi <param>?          -- Read wifi <param>
  mqtt <param> [<value>] -- Set mqtt <param> (one of hostname, port, username, password) to <value>, omit <value> to clear
  mqtt <param>?          -- Read mqtt <param>
  ssl <param> [<hex>]    -- Set ssl <param> (one of ca_cert, client_cert, client_key) to binary value represented as hex, read from the console until newline when <hex> is omitted
  ssl <param>?           -- Show whether ssl <param> is set
  client_id              -- Print MQTT client-id
  clear                  -- Delete all params
  list                   -- List keys and their lengths
  echo [<args>]          -- Print the parsed arguments
  help                   -- Show this help screen";

/// Executes operator commands against a shared store.
pub struct CommandShell<'s, M: RawMutex, B: StorageBackend> {
    store: &'s ConfigStore<M, B>,
    client_id: ClientId,
    capture_timeout: Duration,
}

impl<'s, M: RawMutex, B: StorageBackend> CommandShell<'s, M, B> {
    pub fn new(store: &'s ConfigStore<M, B>, client_id: ClientId) -> Self {
        Self {
            store,
            client_id,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    /// Sets how long binary capture waits for each byte.
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Splits a line on whitespace and executes it.
    pub async fn execute_line<R: Read, W: Write>(
        &self,
        line: &str,
        input: &mut R,
        out: &mut W,
    ) -> Result<(), CommandError> {
        let mut argv: Vec<&str, MAX_ARGS> = Vec::new();
        for token in line.split_whitespace() {
            if argv.push(token).is_err() {
                writeln!(out, "Too many arguments")?;
                return Err(CommandError::Usage);
            }
        }
        self.execute(&argv, input, out).await
    }

    /// Executes a tokenized command. An empty command line does nothing.
    pub async fn execute<R: Read, W: Write>(
        &self,
        argv: &[&str],
        input: &mut R,
        out: &mut W,
    ) -> Result<(), CommandError> {
        let Some(&command) = argv.first() else {
            return Ok(());
        };
        match command {
            "client_id" => self.client_id(out),
            "clear" => self.clear(out).await,
            "list" => self.list(out).await,
            "echo" => echo(argv, out),
            "help" => help(out),
            _ => match Domain::from_name(command) {
                Some(domain) => self.param(domain, argv, input, out).await,
                None => {
                    writeln!(out, "Invalid command: {}", command)?;
                    help(out)?;
                    Err(CommandError::UnknownCommand)
                }
            },
        }
    }

    fn client_id<W: Write>(&self, out: &mut W) -> Result<(), CommandError> {
        writeln!(out, "client-id: {}", self.client_id)?;
        Ok(())
    }

    async fn clear<W: Write>(&self, out: &mut W) -> Result<(), CommandError> {
        let mut guard = self.store.open().await;
        if let Err(e) = guard.erase_all() {
            writeln!(out, "Failed to clear params: {}", e)?;
            return Err(CommandError::Store(e));
        }
        writeln!(out, "All params cleared")?;
        Ok(())
    }

    async fn list<W: Write>(&self, out: &mut W) -> Result<(), CommandError> {
        let guard = self.store.open().await;
        for (key, len) in guard.entries() {
            writeln!(out, "{}: {} bytes", key, len)?;
        }
        Ok(())
    }
}

fn echo<W: Write>(argv: &[&str], out: &mut W) -> Result<(), CommandError> {
    for (i, arg) in argv.iter().enumerate() {
        writeln!(out, "arg[{}]: {}", i, arg)?;
    }
    Ok(())
}

fn help<W: Write>(out: &mut W) -> Result<(), CommandError> {
    writeln!(out, "{}", HELP)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HexError, StoreError};
    use crate::store::keys::*;
    use crate::store::MemoryBackend;
    use crate::test_util::MockStream;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use std::string::String;

    type Store = ConfigStore<NoopRawMutex, MemoryBackend<12, 512>>;

    struct Console<'s> {
        shell: CommandShell<'s, NoopRawMutex, MemoryBackend<12, 512>>,
        input: MockStream,
    }

    impl<'s> Console<'s> {
        fn new(store: &'s Store) -> Self {
            let id = ClientId::from_mac(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
            Self {
                shell: CommandShell::new(store, id).with_capture_timeout(Duration::from_millis(50)),
                input: MockStream::with_input(&[]),
            }
        }

        fn run(&mut self, line: &str) -> (Result<(), CommandError>, String) {
            let mut out = String::new();
            let result = block_on(self.shell.execute_line(line, &mut self.input, &mut out));
            (result, out)
        }
    }

    fn stored(store: &Store, key: &str) -> Option<std::vec::Vec<u8>> {
        let guard = block_on(store.open());
        let mut buf = [0u8; 512];
        guard.load(key, &mut buf).unwrap().map(|v| v.to_vec())
    }

    #[test]
    fn writes_then_reads_a_text_param() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);

        let (result, out) = console.run("mqtt hostname broker.example.com");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "mqtt.hostname: broker.example.com\n");

        let (result, out) = console.run("mqtt hostname?");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "mqtt.hostname: broker.example.com\n");
    }

    #[test]
    fn value_tokens_are_concatenated() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.run("wifi ssid My Home Net");
        assert_eq!(stored(&store, WIFI_SSID).as_deref(), Some(&b"MyHomeNet"[..]));
    }

    #[test]
    fn write_only_params_are_never_echoed() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);

        let (result, out) = console.run("mqtt password hunter2");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "mqtt.password: is set\n");

        let (_, out) = console.run("mqtt password?");
        assert_eq!(out, "mqtt.password: is set\n");
        assert!(!out.contains("hunter2"));
        assert_eq!(stored(&store, MQTT_PASSWORD).as_deref(), Some(&b"hunter2"[..]));
    }

    #[test]
    fn omitted_value_erases() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.run("mqtt port 8883");

        let (result, out) = console.run("mqtt port");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "mqtt.port: cleared\n");
        assert_eq!(stored(&store, MQTT_PORT), None);

        let (result, out) = console.run("mqtt port?");
        assert_eq!(result, Err(CommandError::Store(StoreError::NotFound)));
        assert!(out.starts_with("Failed to read param \"mqtt.port\""));
    }

    #[test]
    fn over_long_value_is_truncated_with_warning() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        let long = "h".repeat(TEXT_VALUE_MAX + 10);

        let (result, out) = console.run(&std::format!("mqtt hostname {long}"));
        assert_eq!(result, Ok(()));
        assert!(out.starts_with("Warning: Truncated value to 64 characters\n"));
        assert_eq!(stored(&store, MQTT_HOSTNAME).map(|v| v.len()), Some(TEXT_VALUE_MAX));
    }

    #[test]
    fn invalid_param_prints_usage_and_mutates_nothing() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);

        let (result, out) = console.run("mqtt endpoint broker");
        assert_eq!(result, Err(CommandError::InvalidParam));
        assert_eq!(result.unwrap_err().exit_code(), 1);
        assert_eq!(out, "Invalid param mqtt.endpoint\nUsage: mqtt <param>[?] [<value>]\n");

        let (result, _) = console.run("wifi hostname x");
        assert_eq!(result, Err(CommandError::InvalidParam));

        let (_, out) = console.run("list");
        assert_eq!(out, "");
    }

    #[test]
    fn missing_param_prints_usage() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        let (result, out) = console.run("wifi");
        assert_eq!(result, Err(CommandError::Usage));
        assert_eq!(out, "Usage: wifi <param>[?] [<value>]\n");
    }

    #[test]
    fn binary_capture_stores_decoded_bytes() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.input.push_input(b"\n30 82 01 0a\r\n");

        let (result, out) = console.run("ssl ca_cert");
        assert_eq!(result, Ok(()));
        assert_eq!(
            out,
            "Ready: send hex string terminated by newline\nssl.ca_cert: 4 bytes\n"
        );
        assert_eq!(stored(&store, SSL_CA_CERT).as_deref(), Some(&[0x30, 0x82, 0x01, 0x0a][..]));

        let (result, out) = console.run("ssl ca_cert?");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "ssl.ca_cert: is set\n");
    }

    #[test]
    fn binary_capture_with_uneven_digits_aborts() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.input.push_input(b"308\n");

        let (result, out) = console.run("ssl client_key");
        assert_eq!(result, Err(CommandError::Capture(HexError::OddDigitCount)));
        assert!(out.contains("Uneven digits\n"));
        assert_eq!(stored(&store, SSL_CLIENT_KEY), None);
    }

    #[test]
    fn binary_capture_times_out() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.input.stall_when_empty = true;

        let (result, _) = console.run("ssl client_cert");
        assert_eq!(result, Err(CommandError::CaptureTimeout));
        assert_eq!(stored(&store, SSL_CLIENT_CERT), None);
    }

    #[test]
    fn inline_hex_is_accepted_for_binary_params() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);

        let (result, out) = console.run("ssl client_cert 3082 010a");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "ssl.client_cert: 4 bytes\n");

        let (result, _) = console.run("ssl client_cert 30g2");
        assert_eq!(result, Err(CommandError::Capture(HexError::InvalidCharacter(b'g'))));
        assert_eq!(stored(&store, SSL_CLIENT_CERT).map(|v| v.len()), Some(4));
    }

    #[test]
    fn list_clear_and_client_id() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        console.run("wifi ssid home");
        console.run("wifi password secret123");

        let (result, out) = console.run("list");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "wifi.ssid: 4 bytes\nwifi.password: 9 bytes\n");

        let (result, _) = console.run("clear");
        assert_eq!(result, Ok(()));
        let (_, out) = console.run("list");
        assert_eq!(out, "");

        let (result, out) = console.run("client_id");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "client-id: ESP-DEADBEEF0001\n");
    }

    #[test]
    fn persistence_failures_are_reported() {
        let store = Store::new(MemoryBackend::new());
        block_on(store.open()).backend_mut().fail_commits(true);
        let mut console = Console::new(&store);

        let (result, out) = console.run("mqtt port 8883");
        assert_eq!(result, Err(CommandError::Store(StoreError::Persistence)));
        assert!(out.starts_with("Failed to set param \"mqtt.port\""));

        let guard = block_on(store.open());
        let mut buf = [0u8; 8];
        assert_eq!(guard.get(MQTT_PORT, &mut buf), Err(StoreError::NotFound));
    }

    #[test]
    fn unknown_commands_print_help() {
        let store = Store::new(MemoryBackend::new());
        let mut console = Console::new(&store);
        let (result, out) = console.run("reboot now");
        assert_eq!(result, Err(CommandError::UnknownCommand));
        assert!(out.starts_with("Invalid command: reboot\nAvailable commands:"));

        let (result, out) = console.run("   ");
        assert_eq!(result, Ok(()));
        assert!(out.is_empty());

        let (_, out) = console.run("echo a b");
        assert_eq!(out, "arg[0]: echo\narg[1]: a\narg[2]: b\n");
    }
}
