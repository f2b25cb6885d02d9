//! TCP connector over an embassy-net stack.

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, with_timeout};

use super::Connector;
use crate::error::ConnectError;

/// Time allowed for the TCP handshake with the broker.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens TCP connections through an embassy-net stack.
///
/// The socket buffers live in the connector, so only one connection can be
/// open at a time.
pub struct EmbassyConnector<'d, const RX: usize = 4096, const TX: usize = 4096> {
    stack: Stack<'d>,
    rx_buffer: [u8; RX],
    tx_buffer: [u8; TX],
    connect_timeout: Duration,
}

impl<'d, const RX: usize, const TX: usize> EmbassyConnector<'d, RX, TX> {
    pub fn new(stack: Stack<'d>) -> Self {
        Self {
            stack,
            rx_buffer: [0; RX],
            tx_buffer: [0; TX],
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl<'d, const RX: usize, const TX: usize> Connector for EmbassyConnector<'d, RX, TX> {
    type Socket<'s>
        = TcpSocket<'s>
    where
        Self: 's;

    async fn connect(&mut self, host: &str, port: u16) -> Result<Self::Socket<'_>, ConnectError> {
        let address = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|_| {
                error!("DNS query for {} failed", host);
                ConnectError::Dns
            })?
            .first()
            .copied()
            .ok_or_else(|| {
                error!("DNS returned no results for {}", host);
                ConnectError::Dns
            })?;
        let endpoint = IpEndpoint::new(address, port);

        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        match with_timeout(self.connect_timeout, socket.connect(endpoint)).await {
            Ok(Ok(())) => {
                debug!("TCP connection established to {}:{}", host, port);
                Ok(socket)
            }
            Ok(Err(_)) => {
                error!("TCP connect to {}:{} failed", host, port);
                Err(ConnectError::Refused)
            }
            Err(_) => {
                error!("TCP connect to {}:{} timed out", host, port);
                socket.abort();
                Err(ConnectError::Timeout)
            }
        }
    }
}
