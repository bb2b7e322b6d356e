//! Protocol generation profiles.
//!
//! The daemon's payload grammars changed across deployments without a
//! version handshake, so the dialect is chosen once when a session is
//! built and threaded through the codec. Call sites never branch on it.

use serde::{Deserialize, Serialize};

/// Payload dialect spoken by a daemon generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// Comma/colon-delimited positional payloads.
    Delimited,
    /// Space-separated `key=value` payloads.
    #[default]
    KeyValue,
}

/// Wire-grammar knobs for one daemon generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Payload dialect.
    pub dialect: Dialect,
    /// Whether the daemon answers `getIP`. Only mid-generation daemons
    /// do; sessions skip the refinement elsewhere.
    pub supports_get_ip: bool,
}

impl Profile {
    /// Earliest deployed daemon: delimited payloads, no `getIP`.
    pub const LEGACY: Self = Self { dialect: Dialect::Delimited, supports_get_ip: false };

    /// Mid-generation daemons: delimited payloads plus `getIP`.
    pub const CLASSIC: Self = Self { dialect: Dialect::Delimited, supports_get_ip: true };

    /// Current daemon: `key=value` payloads, `getIP` retired.
    pub const CURRENT: Self = Self { dialect: Dialect::KeyValue, supports_get_ip: false };
}

impl Default for Profile {
    fn default() -> Self {
        Self::CURRENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_current_generation() {
        assert_eq!(Profile::default(), Profile::CURRENT);
        assert_eq!(Profile::default().dialect, Dialect::KeyValue);
    }

    #[test]
    fn get_ip_only_in_classic() {
        assert!(!Profile::LEGACY.supports_get_ip);
        assert!(Profile::CLASSIC.supports_get_ip);
        assert!(!Profile::CURRENT.supports_get_ip);
    }
}
