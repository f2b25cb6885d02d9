//! Raw hex capture for binary parameters.
//!
//! The console is switched to byte-at-a-time input and hex digit pairs are
//! decoded until a line end. Line ends before the first digit are skipped, so
//! the newline that submitted the command does not end the capture. Input is
//! consumed one byte at a time, so whatever follows the terminating line end
//! stays unread for the next command.

use embassy_time::{Duration, with_timeout};
use embedded_io_async::Read;
use heapless::Vec;
use zeroize::Zeroize;

use crate::error::{CommandError, HexError};
use crate::store::hex::HexDecoder;

/// How long the capture waits for the next byte before giving up.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(60);

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// Decoded bytes of a binary parameter, wiped on drop.
pub struct Capture<const N: usize> {
    bytes: Vec<u8, N>,
}

impl<const N: usize> Capture<N> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<const N: usize> Drop for Capture<N> {
    fn drop(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }
}

/// Reads hex digits from `input` until a line end.
pub async fn capture_hex<R: Read, const N: usize>(
    input: &mut R,
    idle_timeout: Duration,
) -> Result<Capture<N>, CommandError> {
    let mut capture = Capture { bytes: Vec::new() };
    let mut decoder = HexDecoder::new();
    let mut started = false;
    let mut c = [0u8; 1];

    loop {
        match with_timeout(idle_timeout, input.read(&mut c)).await {
            Err(_) => return Err(CommandError::CaptureTimeout),
            Ok(Err(_)) | Ok(Ok(0)) => return Err(CommandError::CaptureInput),
            Ok(Ok(_)) => {}
        }

        if c[0] == LF || c[0] == CR {
            if started {
                c.zeroize();
                decoder.finish()?;
                return Ok(capture);
            }
            continue;
        }
        started = true;
        if let Some(byte) = decoder.push(c[0])? {
            capture
                .bytes
                .push(byte)
                .map_err(|_| CommandError::Capture(HexError::Overflow))?;
        }
    }
}
