//! Parameter names and the per-domain validator.
//!
//! Every stored key is `<domain>.<name>`. Whether a key exists, whether its
//! value may be echoed back and how its value is encoded are properties of the
//! key itself and are never persisted.

use core::fmt;

/// Longest key the storage layer accepts.
pub const MAX_KEY_LEN: usize = 15;

/// Longest text value, in bytes.
pub const TEXT_VALUE_MAX: usize = 64;

/// Largest binary value (certificates and keys), in bytes.
pub const BINARY_VALUE_MAX: usize = 0x2000;

pub const WIFI_SSID: &str = "wifi.ssid";
pub const WIFI_BSSID: &str = "wifi.bssid";
pub const WIFI_PASSWORD: &str = "wifi.password";
pub const MQTT_HOSTNAME: &str = "mqtt.hostname";
pub const MQTT_PORT: &str = "mqtt.port";
pub const MQTT_USERNAME: &str = "mqtt.username";
pub const MQTT_PASSWORD: &str = "mqtt.password";
pub const SSL_CA_CERT: &str = "ssl.ca_cert";
pub const SSL_CLIENT_CERT: &str = "ssl.client_cert";
pub const SSL_CLIENT_KEY: &str = "ssl.client_key";

/// How a value is entered and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Encoding {
    /// Printable text, entered as command tokens.
    Text,
    /// Raw bytes, entered as hexadecimal digits.
    Binary,
}

/// Static description of a recognized parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParamInfo {
    pub key: &'static str,
    /// Reads report presence only, never the value.
    pub write_only: bool,
    pub encoding: Encoding,
}

impl ParamInfo {
    const fn text(key: &'static str) -> Self {
        Self {
            key,
            write_only: false,
            encoding: Encoding::Text,
        }
    }

    const fn secret(key: &'static str) -> Self {
        Self {
            key,
            write_only: true,
            encoding: Encoding::Text,
        }
    }

    const fn binary(key: &'static str) -> Self {
        Self {
            key,
            write_only: true,
            encoding: Encoding::Binary,
        }
    }

    /// Upper bound on the stored value length.
    pub fn max_len(&self) -> usize {
        match self.encoding {
            Encoding::Text => TEXT_VALUE_MAX,
            Encoding::Binary => BINARY_VALUE_MAX,
        }
    }

    /// Part of the key after the domain prefix.
    pub fn name(&self) -> &'static str {
        self.key
            .split_once('.')
            .map(|(_, name)| name)
            .unwrap_or(self.key)
    }
}

const WIFI_PARAMS: [ParamInfo; 3] = [
    ParamInfo::text(WIFI_SSID),
    ParamInfo::text(WIFI_BSSID),
    ParamInfo::secret(WIFI_PASSWORD),
];

const MQTT_PARAMS: [ParamInfo; 4] = [
    ParamInfo::text(MQTT_HOSTNAME),
    ParamInfo::text(MQTT_PORT),
    ParamInfo::secret(MQTT_USERNAME),
    ParamInfo::secret(MQTT_PASSWORD),
];

const SSL_PARAMS: [ParamInfo; 3] = [
    ParamInfo::binary(SSL_CA_CERT),
    ParamInfo::binary(SSL_CLIENT_CERT),
    ParamInfo::binary(SSL_CLIENT_KEY),
];

/// Subsystem sharing the parameter namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Domain {
    Wifi,
    Mqtt,
    Ssl,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Wifi, Domain::Mqtt, Domain::Ssl];

    /// Command name, also the key prefix without the dot.
    pub fn name(self) -> &'static str {
        match self {
            Domain::Wifi => "wifi",
            Domain::Mqtt => "mqtt",
            Domain::Ssl => "ssl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    pub fn params(self) -> &'static [ParamInfo] {
        match self {
            Domain::Wifi => &WIFI_PARAMS,
            Domain::Mqtt => &MQTT_PARAMS,
            Domain::Ssl => &SSL_PARAMS,
        }
    }

    /// Validates a fully qualified key against this domain.
    pub fn validate(self, key: &str) -> Option<&'static ParamInfo> {
        self.params().iter().find(|param| param.key == key)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validates a fully qualified key against every domain.
pub fn lookup(key: &str) -> Option<&'static ParamInfo> {
    let (prefix, _) = key.split_once('.')?;
    Domain::from_name(prefix)?.validate(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_declared_key() {
        let expected = [
            (WIFI_SSID, false, Encoding::Text),
            (WIFI_BSSID, false, Encoding::Text),
            (WIFI_PASSWORD, true, Encoding::Text),
            (MQTT_HOSTNAME, false, Encoding::Text),
            (MQTT_PORT, false, Encoding::Text),
            (MQTT_USERNAME, true, Encoding::Text),
            (MQTT_PASSWORD, true, Encoding::Text),
            (SSL_CA_CERT, true, Encoding::Binary),
            (SSL_CLIENT_CERT, true, Encoding::Binary),
            (SSL_CLIENT_KEY, true, Encoding::Binary),
        ];
        for (key, write_only, encoding) in expected {
            let param = lookup(key).unwrap();
            assert_eq!(param.key, key);
            assert_eq!(param.write_only, write_only, "{key}");
            assert_eq!(param.encoding, encoding, "{key}");
            assert!(key.len() <= MAX_KEY_LEN, "{key}");
        }
    }

    #[test]
    fn rejects_unknown_and_cross_domain_keys() {
        for key in ["", "mqtt", "mqtt.", "mqtt.host", "wifi.hostname", "ssl.ssid", "foo.bar", "MQTT.port"] {
            assert!(lookup(key).is_none(), "{key}");
        }
        assert!(Domain::Wifi.validate(MQTT_PORT).is_none());
        assert!(Domain::Mqtt.validate(MQTT_PORT).is_some());
    }

    #[test]
    fn domain_names_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_name(domain.name()), Some(domain));
        }
        assert_eq!(Domain::from_name("tls"), None);
    }

    #[test]
    fn value_limits_follow_encoding() {
        assert_eq!(lookup(MQTT_HOSTNAME).unwrap().max_len(), TEXT_VALUE_MAX);
        assert_eq!(lookup(SSL_CA_CERT).unwrap().max_len(), BINARY_VALUE_MAX);
        assert_eq!(lookup(SSL_CA_CERT).unwrap().name(), "ca_cert");
    }
}
