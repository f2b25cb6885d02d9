//! The `<domain> <param>[?] [<value>...]` command family.

use core::fmt::Write;

use embedded_io_async::Read;
use heapless::String;

use super::capture::capture_hex;
use super::CommandShell;
use crate::error::{CommandError, StoreError};
use crate::store::keys::{BINARY_VALUE_MAX, MAX_KEY_LEN, TEXT_VALUE_MAX};
use crate::store::{Domain, Encoding, ParamInfo, Readback, StorageBackend};
use embassy_sync::blocking_mutex::raw::RawMutex;

/// What a parsed parameter command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Read,
    Write,
    /// No value tokens: erase, or capture for binary parameters.
    Bare,
}

/// Joins value tokens without separators, keeping at most `N` bytes.
///
/// Returns the joined value and whether anything was cut off.
pub fn join_tokens<const N: usize>(tokens: &[&str]) -> (String<N>, bool) {
    let mut value = String::new();
    for token in tokens {
        for c in token.chars() {
            if value.push(c).is_err() {
                return (value, true);
            }
        }
    }
    (value, false)
}

fn usage<W: Write>(out: &mut W, domain: Domain) -> Result<(), CommandError> {
    writeln!(out, "Usage: {} <param>[?] [<value>]", domain.name())?;
    Ok(())
}

impl<M: RawMutex, B: StorageBackend> CommandShell<'_, M, B> {
    pub(super) async fn param<R: Read, W: Write>(
        &self,
        domain: Domain,
        argv: &[&str],
        input: &mut R,
        out: &mut W,
    ) -> Result<(), CommandError> {
        let Some(&name) = argv.get(1) else {
            usage(out, domain)?;
            return Err(CommandError::Usage);
        };
        let values = &argv[2..];
        let (name, action) = match name.strip_suffix('?') {
            Some(name) => (name, Action::Read),
            None if values.is_empty() => (name, Action::Bare),
            None => (name, Action::Write),
        };

        let mut key: String<MAX_KEY_LEN> = String::new();
        let built = key.push_str(domain.name()).is_ok()
            && key.push('.').is_ok()
            && key.push_str(name).is_ok();
        let param = match domain.validate(&key) {
            Some(param) if built => param,
            _ => {
                writeln!(out, "Invalid param {}.{}", domain.name(), name)?;
                usage(out, domain)?;
                return Err(CommandError::InvalidParam);
            }
        };

        match (action, param.encoding) {
            (Action::Read, _) => self.read_param(param, out).await,
            (Action::Write, Encoding::Text) => self.write_text(param, values, out).await,
            (Action::Write, Encoding::Binary) => self.write_hex(param, values, out).await,
            (Action::Bare, Encoding::Text) => self.erase_param(param, out).await,
            (Action::Bare, Encoding::Binary) => self.capture_param(param, input, out).await,
        }
    }

    async fn read_param<W: Write>(&self, param: &ParamInfo, out: &mut W) -> Result<(), CommandError> {
        let guard = self.store.open().await;
        let mut buf = [0u8; TEXT_VALUE_MAX];
        match guard.get(param.key, &mut buf) {
            Ok(Readback::Set) => writeln!(out, "{}: is set", param.key)?,
            Ok(Readback::Value(value)) => match core::str::from_utf8(value) {
                Ok(text) => writeln!(out, "{}: {}", param.key, text)?,
                Err(_) => writeln!(out, "{}: format invalid for display", param.key)?,
            },
            Err(e) => return report_failure(out, "read", param.key, e),
        }
        Ok(())
    }

    async fn write_text<W: Write>(
        &self,
        param: &ParamInfo,
        tokens: &[&str],
        out: &mut W,
    ) -> Result<(), CommandError> {
        let (value, truncated) = join_tokens::<TEXT_VALUE_MAX>(tokens);
        if truncated {
            writeln!(out, "Warning: Truncated value to {} characters", TEXT_VALUE_MAX)?;
        }

        let mut guard = self.store.open().await;
        if let Err(e) = guard.set(param.key, value.as_bytes()) {
            return report_failure(out, "set", param.key, e);
        }
        if param.write_only {
            writeln!(out, "{}: is set", param.key)?;
        } else {
            writeln!(out, "{}: {}", param.key, value)?;
        }
        Ok(())
    }

    async fn write_hex<W: Write>(
        &self,
        param: &ParamInfo,
        tokens: &[&str],
        out: &mut W,
    ) -> Result<(), CommandError> {
        let mut guard = self.store.open().await;
        match guard.set_hex(param.key, tokens) {
            Ok(len) => {
                writeln!(out, "{}: {} bytes", param.key, len)?;
                Ok(())
            }
            Err(StoreError::InvalidHex(e)) => {
                writeln!(out, "{}", e)?;
                writeln!(out, "Failed to parse hex input")?;
                Err(CommandError::Capture(e))
            }
            Err(e) => report_failure(out, "set", param.key, e),
        }
    }

    async fn erase_param<W: Write>(&self, param: &ParamInfo, out: &mut W) -> Result<(), CommandError> {
        let mut guard = self.store.open().await;
        match guard.erase(param.key) {
            Ok(()) => {
                writeln!(out, "{}: cleared", param.key)?;
                Ok(())
            }
            Err(e) => report_failure(out, "clear", param.key, e),
        }
    }

    async fn capture_param<R: Read, W: Write>(
        &self,
        param: &ParamInfo,
        input: &mut R,
        out: &mut W,
    ) -> Result<(), CommandError> {
        writeln!(out, "Ready: send hex string terminated by newline")?;
        // The store stays closed while waiting on the operator.
        let capture = match capture_hex::<_, BINARY_VALUE_MAX>(input, self.capture_timeout).await {
            Ok(capture) => capture,
            Err(CommandError::Capture(e)) => {
                writeln!(out, "{}", e)?;
                writeln!(out, "Failed to parse hex input")?;
                return Err(CommandError::Capture(e));
            }
            Err(e) => {
                writeln!(out, "{}", e)?;
                return Err(e);
            }
        };

        let mut guard = self.store.open().await;
        if let Err(e) = guard.set(param.key, capture.as_bytes()) {
            return report_failure(out, "set", param.key, e);
        }
        writeln!(out, "{}: {} bytes", param.key, capture.len())?;
        Ok(())
    }
}

fn report_failure<W: Write>(out: &mut W, verb: &str, key: &str, err: StoreError) -> Result<(), CommandError> {
    writeln!(out, "Failed to {} param \"{}\": {}", verb, key, err)?;
    Err(CommandError::Store(err))
}
