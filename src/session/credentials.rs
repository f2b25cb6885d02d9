//! Broker endpoint and trust material, loaded from the credential store.

use core::str;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::{String, Vec};
use zeroize::Zeroize;

use crate::error::SessionError;
use crate::store::keys::{
    BINARY_VALUE_MAX, MQTT_HOSTNAME, MQTT_PASSWORD, MQTT_PORT, MQTT_USERNAME, SSL_CA_CERT,
    SSL_CLIENT_CERT, SSL_CLIENT_KEY, TEXT_VALUE_MAX,
};
use crate::store::{StorageBackend, StoreGuard};

pub const MAX_HOSTNAME_LEN: usize = 64;
pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 32;

/// DER bytes of a certificate or private key.
pub type Material = Vec<u8, BINARY_VALUE_MAX>;

const PEM_PREFIX: &[u8] = b"-----BEGIN";

/// Everything needed to open an authenticated session to the broker.
///
/// Secrets are wiped when the value is dropped.
pub struct SessionCredentials {
    hostname: String<MAX_HOSTNAME_LEN>,
    port: u16,
    username: Option<Vec<u8, MAX_USERNAME_LEN>>,
    password: Option<Vec<u8, MAX_PASSWORD_LEN>>,
    ca_cert: Option<Material>,
    client_cert: Option<Material>,
    client_key: Option<Material>,
}

impl SessionCredentials {
    /// Creates credentials for `hostname:port` with no authentication material.
    pub fn new(hostname: &str, port: u16) -> Result<Self, SessionError> {
        if port == 0 {
            return Err(SessionError::InvalidPort);
        }
        let mut host = String::new();
        host.push_str(hostname)
            .map_err(|_| SessionError::ParameterTooLong(MQTT_HOSTNAME))?;
        Ok(Self {
            hostname: host,
            port,
            username: None,
            password: None,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        })
    }

    /// Reads every session parameter from an open store.
    ///
    /// The hostname and port are required. The CA certificate and the client
    /// identity are each optional; a client certificate without its key (or
    /// the reverse) is ignored.
    pub fn load<M: RawMutex, B: StorageBackend>(
        store: &StoreGuard<'_, M, B>,
    ) -> Result<Self, SessionError> {
        let mut text = [0u8; TEXT_VALUE_MAX];

        let hostname = load_text(store, MQTT_HOSTNAME, &mut text)?
            .ok_or(SessionError::MissingParameter(MQTT_HOSTNAME))?;
        let mut creds = Self::new(hostname, 1)?;

        let port = load_text(store, MQTT_PORT, &mut text)?
            .ok_or(SessionError::MissingParameter(MQTT_PORT))?;
        creds.port = parse_port(port)?;

        if let Some(username) = load_text(store, MQTT_USERNAME, &mut text)? {
            let value = Vec::from_slice(username.as_bytes())
                .map_err(|_| SessionError::ParameterTooLong(MQTT_USERNAME))?;
            creds.username = Some(value);
        }

        if let Some(password) = store.load(MQTT_PASSWORD, &mut text)? {
            let value = Vec::from_slice(password)
                .map_err(|_| SessionError::ParameterTooLong(MQTT_PASSWORD))?;
            creds.password = Some(value);
        }
        text.zeroize();

        creds.ca_cert = load_material(store, SSL_CA_CERT)?;
        let client_cert = load_material(store, SSL_CLIENT_CERT)?;
        let client_key = load_material(store, SSL_CLIENT_KEY)?;
        match (client_cert, client_key) {
            (Some(cert), Some(key)) => {
                debug!("Client certificate loaded ({} bytes)", cert.len());
                creds.client_cert = Some(cert);
                creds.client_key = Some(key);
            }
            (Some(_), None) => warn!("{} is set without {}, skipping client identity", SSL_CLIENT_CERT, SSL_CLIENT_KEY),
            (None, Some(_)) => warn!("{} is set without {}, skipping client identity", SSL_CLIENT_KEY, SSL_CLIENT_CERT),
            (None, None) => {}
        }

        Ok(creds)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().and_then(|u| str::from_utf8(u).ok())
    }

    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    /// DER encoded CA certificate, if one is configured.
    pub fn ca_cert(&self) -> Option<&[u8]> {
        self.ca_cert.as_deref()
    }

    /// DER encoded client certificate and private key, if both are configured.
    pub fn client_identity(&self) -> Option<(&[u8], &[u8])> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }

    pub fn with_username(mut self, username: &str, password: Option<&[u8]>) -> Result<Self, SessionError> {
        let value = Vec::from_slice(username.as_bytes())
            .map_err(|_| SessionError::ParameterTooLong(MQTT_USERNAME))?;
        self.username = Some(value);
        self.password = match password {
            Some(p) => Some(Vec::from_slice(p).map_err(|_| SessionError::ParameterTooLong(MQTT_PASSWORD))?),
            None => None,
        };
        Ok(self)
    }

    /// Sets the CA certificate from DER or PEM bytes.
    pub fn with_ca_cert(mut self, cert: &[u8]) -> Result<Self, SessionError> {
        self.ca_cert = Some(to_der(SSL_CA_CERT, cert)?);
        Ok(self)
    }

    /// Sets the client certificate and private key from DER or PEM bytes.
    pub fn with_client_identity(mut self, cert: &[u8], key: &[u8]) -> Result<Self, SessionError> {
        self.client_cert = Some(to_der(SSL_CLIENT_CERT, cert)?);
        self.client_key = Some(to_der(SSL_CLIENT_KEY, key)?);
        Ok(self)
    }

    /// Overwrites and forgets the username, password and client key.
    pub fn wipe_secrets(&mut self) {
        if let Some(mut username) = self.username.take() {
            username.as_mut_slice().zeroize();
        }
        if let Some(mut password) = self.password.take() {
            password.as_mut_slice().zeroize();
        }
        if let Some(mut key) = self.client_key.take() {
            key.as_mut_slice().zeroize();
        }
        self.client_cert = None;
    }
}

impl Drop for SessionCredentials {
    fn drop(&mut self) {
        self.wipe_secrets();
    }
}

fn load_text<'b, M: RawMutex, B: StorageBackend>(
    store: &StoreGuard<'_, M, B>,
    key: &'static str,
    buf: &'b mut [u8],
) -> Result<Option<&'b str>, SessionError> {
    match store.load(key, buf)? {
        Some(bytes) => str::from_utf8(bytes)
            .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
            .map_err(|_| SessionError::InvalidParameter(key)),
        None => Ok(None),
    }
}

fn load_material<M: RawMutex, B: StorageBackend>(
    store: &StoreGuard<'_, M, B>,
    key: &'static str,
) -> Result<Option<Material>, SessionError> {
    let mut raw = [0u8; BINARY_VALUE_MAX];
    let result = match store.load(key, &mut raw)? {
        Some(bytes) => to_der(key, bytes).map(Some),
        None => Ok(None),
    };
    raw.zeroize();
    result
}

/// Converts stored material to DER, decoding it first if it is PEM text.
fn to_der(key: &'static str, stored: &[u8]) -> Result<Material, SessionError> {
    if !stored.starts_with(PEM_PREFIX) {
        return Vec::from_slice(stored).map_err(|_| SessionError::ParameterTooLong(key));
    }

    let end = stored
        .iter()
        .rposition(|&b| !matches!(b, 0 | b' ' | b'\t' | b'\r' | b'\n'))
        .map_or(0, |i| i + 1);
    let mut der = [0u8; BINARY_VALUE_MAX];
    let result = match pem_rfc7468::decode(&stored[..end], &mut der) {
        Ok((label, bytes)) => {
            trace!("Decoded PEM {} block for {}", label, key);
            Vec::from_slice(bytes).map_err(|_| SessionError::ParameterTooLong(key))
        }
        Err(_) => Err(SessionError::InvalidPem(key)),
    };
    der.zeroize();
    result
}

fn parse_port(text: &str) -> Result<u16, SessionError> {
    if text.is_empty() || text.len() > 5 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionError::InvalidPort);
    }
    match text.parse::<u16>() {
        Ok(0) | Err(_) => Err(SessionError::InvalidPort),
        Ok(port) => Ok(port),
    }
}
