//! Device descriptions as supplied by the inventory collaborator.
//!
//! The gateway never stores a [`Device`]: it reads credentials from it while a
//! session is being established and keeps a [`DeviceSnapshot`] afterwards.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Router,
    Switch,
    Firewall,
}

/// Management protocol used to reach a device CLI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Telnet,
}

impl Protocol {
    /// Well-known TCP port for the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ssh => 22,
            Protocol::Telnet => 23,
        }
    }

    /// Line terminator sent after each command.
    pub fn line_terminator(self) -> &'static str {
        match self {
            Protocol::Ssh => "\n",
            Protocol::Telnet => "\r\n",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssh => f.write_str("ssh"),
            Protocol::Telnet => f.write_str("telnet"),
        }
    }
}

/// A registered network device.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct Device {
    /// Inventory id, if the caller has one.
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    pub ip_address: String,
    /// Overrides the protocol's default port.
    #[serde(default)]
    pub port: Option<u16>,
    pub device_type: DeviceType,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Secret used to reach privileged mode when the login lands in user mode.
    #[serde(default)]
    pub enable_password: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Device profile name (see [`crate::profile::BUILTIN_PROFILES`]).
    /// Derived from `device_type` when absent.
    #[serde(default)]
    pub platform: Option<String>,
}

impl Device {
    /// Creates a device with empty credentials.
    pub fn new(
        name: impl Into<String>,
        ip_address: impl Into<String>,
        device_type: DeviceType,
        protocol: Protocol,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            ip_address: ip_address.into(),
            port: None,
            device_type,
            protocol,
            username: String::new(),
            password: String::new(),
            enable_password: None,
            model: None,
            platform: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_enable_password(mut self, enable_password: impl Into<String>) -> Self {
        self.enable_password = Some(enable_password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Port to dial for the given protocol.
    pub fn port_for(&self, protocol: Protocol) -> u16 {
        self.port.unwrap_or_else(|| protocol.default_port())
    }

    /// Credentials borrowed for one login.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            enable_password: self.enable_password.clone().filter(|p| !p.is_empty()),
        }
    }

    /// Secret-free copy retained for the lifetime of a session.
    pub fn snapshot(&self, protocol: Protocol) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            name: self.name.clone(),
            ip_address: self.ip_address.clone(),
            port: self.port_for(protocol),
            device_type: self.device_type,
            protocol,
            username: self.username.clone(),
            model: self.model.clone(),
            platform: self.platform.clone(),
            credential_fingerprint: fingerprint(&self.username, &self.password),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ip_address", &self.ip_address)
            .field("port", &self.port)
            .field("device_type", &self.device_type)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("enable_password", &self.enable_password.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("platform", &self.platform)
            .finish()
    }
}

/// Login material for one session establishment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub enable_password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// What a live session remembers about its device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct DeviceSnapshot {
    pub id: Option<u64>,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub device_type: DeviceType,
    pub protocol: Protocol,
    pub username: String,
    pub model: Option<String>,
    pub platform: Option<String>,
    /// SHA-256 over `username:password`, used to compare credentials without keeping them.
    #[serde(skip)]
    pub credential_fingerprint: [u8; 32],
}

impl DeviceSnapshot {
    /// `user@addr:port`, used as a log label.
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.ip_address, self.port)
    }

    /// Whether `device` still carries the credentials this session was opened with.
    pub fn same_credentials(&self, device: &Device) -> bool {
        self.credential_fingerprint == fingerprint(&device.username, &device.password)
    }

    /// Short hex form of the credential fingerprint.
    pub fn fingerprint_hex(&self) -> String {
        self.credential_fingerprint[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

fn fingerprint(username: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Device {
        Device::new("R1", "192.0.2.1", DeviceType::Router, Protocol::Ssh)
            .with_credentials("admin", "cisco")
            .with_enable_password("class")
    }

    #[test]
    fn deserializes_client_payload_with_defaults() {
        let json = r#"{
            "name": "core-sw",
            "ip_address": "10.0.0.2",
            "device_type": "switch",
            "protocol": "telnet",
            "username": "ops",
            "password": "pw"
        }"#;
        let device: Device = serde_json::from_str(json).expect("valid device json");
        assert_eq!(device.device_type, DeviceType::Switch);
        assert_eq!(device.protocol, Protocol::Telnet);
        assert_eq!(device.port_for(Protocol::Telnet), 23);
        assert!(device.enable_password.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?} {:?}", router(), router().credentials());
        assert!(!rendered.contains("cisco"));
        assert!(!rendered.contains("class"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn snapshot_drops_secrets_but_compares_credentials() {
        let device = router();
        let snapshot = device.snapshot(Protocol::Telnet);
        assert_eq!(snapshot.port, 23);
        assert_eq!(snapshot.label(), "admin@192.0.2.1:23");
        assert!(snapshot.same_credentials(&device));

        let changed = device.clone().with_credentials("admin", "other");
        assert!(!snapshot.same_credentials(&changed));

        let json = serde_json::to_string(&snapshot).expect("snapshot serializes");
        assert!(!json.contains("fingerprint"));
        assert_eq!(snapshot.fingerprint_hex().len(), 16);
    }

    #[test]
    fn empty_enable_password_is_ignored() {
        let device = router().with_enable_password("");
        assert!(device.credentials().enable_password.is_none());
    }

    #[test]
    fn explicit_port_overrides_protocol_default() {
        let device = router().with_port(2222);
        assert_eq!(device.port_for(Protocol::Ssh), 2222);
        assert_eq!(device.port_for(Protocol::Telnet), 2222);
    }
}
