//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the byte
//! stream the MQTT engine runs over, and `StreamTransport`, which adapts any
//! `embedded-io-async` stream (the TLS session in production) to it.
//!
//! `StreamTransport` owns the partial-I/O rules: writes loop until every byte
//! is accepted, reads loop until the requested length has arrived, and each
//! individual read is bounded by a timeout.

use core::fmt;

use embassy_time::{Duration, Timer};
use embedded_io_async::{Error as _, Read, Write};

/// Read timeout applied to every wait for broker data.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A trait representing a transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: fmt::Debug;

    /// Sends the whole buffer over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Fills the whole buffer from the transport.
    ///
    /// Fails if the peer closes the stream or stops sending before the buffer
    /// is full.
    async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Failures of a `StreamTransport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError<E> {
    /// The underlying stream reported an error.
    Io(E),
    /// No data arrived within the read timeout.
    Timeout,
    /// The peer closed the stream.
    Closed,
    /// The stream stopped accepting data part way through a write.
    ShortWrite { written: usize, expected: usize },
}

impl<E: fmt::Debug> fmt::Display for LinkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io(e) => write!(f, "stream error: {e:?}"),
            LinkError::Timeout => f.write_str("read timed out"),
            LinkError::Closed => f.write_str("connection closed by peer"),
            LinkError::ShortWrite { written, expected } => {
                write!(f, "short write: {written} of {expected} bytes")
            }
        }
    }
}

impl<E: fmt::Debug> core::error::Error for LinkError<E> {}

/// Adapts a byte stream to `MqttTransport`.
pub struct StreamTransport<S> {
    stream: S,
    timeout: Duration,
}

impl<S: Read + Write> StreamTransport<S> {
    /// Creates a new `StreamTransport` with the given stream and read timeout.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Returns a mutable reference to the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwraps the transport, returning the stream so it can be shut down.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, LinkError<S::Error>> {
        // Use `select` to race the read operation against a timer.
        let read_fut = self.stream.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                warn!("Connection closed by peer");
                Err(LinkError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => {
                trace!("Read {} bytes", n);
                Ok(n)
            }
            futures::future::Either::Left((Err(e), _)) => {
                error!("Read error: {:?}", e.kind());
                Err(LinkError::Io(e))
            }
            futures::future::Either::Right(((), _)) => {
                warn!("Read timed out");
                Err(LinkError::Timeout)
            }
        }
    }
}

impl<S: Read + Write> MqttTransport for StreamTransport<S> {
    type Error = LinkError<S::Error>;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("Sending {} bytes", buf.len());

        let mut written = 0;
        while written < buf.len() {
            match self.stream.write(&buf[written..]).await {
                Ok(0) => {
                    error!("Write stalled after {} of {} bytes", written, buf.len());
                    return Err(LinkError::ShortWrite {
                        written,
                        expected: buf.len(),
                    });
                }
                Ok(n) => written += n,
                Err(e) => {
                    error!("Write error: {:?}", e.kind());
                    return Err(LinkError::Io(e));
                }
            }
        }

        // Flush to ensure data is actually sent to the network
        self.stream.flush().await.map_err(LinkError::Io)
    }

    async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_with_timeout(&mut buf[filled..]).await?;
        }
        Ok(())
    }
}
