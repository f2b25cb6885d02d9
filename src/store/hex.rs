//! Hexadecimal input decoding for binary parameters.
//!
//! Digits may be upper or lower case and spaces between them are ignored.
//! Decoding is streaming so bytes can be fed as they arrive from a console.

use heapless::Vec;

use crate::error::HexError;

/// Streaming hex decoder that yields a byte for every second digit.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexDecoder {
    high: Option<u8>,
}

impl HexDecoder {
    pub const fn new() -> Self {
        Self { high: None }
    }

    /// Feeds one input character.
    pub fn push(&mut self, c: u8) -> Result<Option<u8>, HexError> {
        if c == b' ' {
            return Ok(None);
        }
        let nibble = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => return Err(HexError::InvalidCharacter(c)),
        };
        match self.high.take() {
            Some(high) => Ok(Some((high << 4) | nibble)),
            None => {
                self.high = Some(nibble);
                Ok(None)
            }
        }
    }

    /// Ends the input; fails if a digit is left without its pair.
    pub fn finish(self) -> Result<(), HexError> {
        match self.high {
            Some(_) => Err(HexError::OddDigitCount),
            None => Ok(()),
        }
    }
}

/// Decodes `input` into `out`.
///
/// `out` is left empty when decoding fails.
pub fn decode_into<const N: usize>(input: &[u8], out: &mut Vec<u8, N>) -> Result<(), HexError> {
    decode_chunks_into([input], out)
}

/// Decodes the concatenation of several inputs into `out`.
///
/// A digit pair may straddle two chunks. `out` is left empty when decoding fails.
pub fn decode_chunks_into<I, T, const N: usize>(chunks: I, out: &mut Vec<u8, N>) -> Result<(), HexError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    out.clear();
    let result = decode_append(chunks, out);
    if result.is_err() {
        out.clear();
    }
    result
}

fn decode_append<I, T, const N: usize>(chunks: I, out: &mut Vec<u8, N>) -> Result<(), HexError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut decoder = HexDecoder::new();
    for chunk in chunks {
        for &c in chunk.as_ref() {
            if let Some(byte) = decoder.push(c)? {
                out.push(byte).map_err(|_| HexError::Overflow)?;
            }
        }
    }
    decoder.finish()
}
