use std::borrow::Cow;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::algorithms;

/// How strict SSH algorithm negotiation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only.
    #[default]
    Secure,
    /// Adds CBC ciphers, SHA-1 MACs and group14-sha1.
    Balanced,
    /// Everything the SSH stack can speak, for very old images.
    LegacyCompatible,
}

/// SSH negotiation and host-key policy for outgoing connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    /// Legacy algorithms and no host-key verification.
    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    /// Builds options from the service configuration.
    pub fn from_settings(level: SecurityLevel, verify_host_key: bool) -> Self {
        Self {
            level,
            server_check: if verify_host_key {
                ServerCheckMethod::DefaultKnownHostsFile
            } else {
                ServerCheckMethod::NoCheck
            },
        }
    }

    pub(super) fn preferred(&self) -> Preferred {
        match self.level {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(algorithms::SECURE_KEX_ORDER),
                key: Cow::Borrowed(algorithms::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::SECURE_CIPHERS),
                mac: Cow::Borrowed(algorithms::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(algorithms::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(algorithms::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::BALANCED_CIPHERS),
                mac: Cow::Borrowed(algorithms::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(algorithms::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(algorithms::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(algorithms::LEGACY_CIPHERS),
                mac: Cow::Borrowed(algorithms::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(algorithms::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}
