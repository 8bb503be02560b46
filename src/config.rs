// SPDX-License-Identifier: Apache-2.0
// Copyright Authors of bpfman

//! Attach modes and an optional ambient per-interface default
//! config layer, adapted from bpfman's `InterfaceConfig`/`XdpMode`.

use std::{collections::HashMap, str::FromStr};

use aya::programs::XdpFlags;
use serde::Deserialize;

use crate::errors::Error;

/// One of the four attach modes a dispatcher can be attached in. Each
/// corresponds to one kernel XDP attach-flag bit, except `Unspec` which
/// leaves the field unset and lets the kernel pick.
#[derive(Debug, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    Skb,
    Native,
    Hw,
    Unspec,
}

impl AttachMode {
    pub(crate) fn as_flags(self) -> XdpFlags {
        match self {
            AttachMode::Skb => XdpFlags::SKB_MODE,
            AttachMode::Native => XdpFlags::DRV_MODE,
            AttachMode::Hw => XdpFlags::HW_MODE,
            AttachMode::Unspec => XdpFlags::empty(),
        }
    }

    /// The mode used when `force` replaces an existing attachment of the
    /// opposite kind: the one other mode that isn't
    /// `self` and isn't `Unspec`.
    pub(crate) fn opposite(self) -> AttachMode {
        match self {
            AttachMode::Skb => AttachMode::Native,
            AttachMode::Native | AttachMode::Hw | AttachMode::Unspec => AttachMode::Skb,
        }
    }
}

impl std::fmt::Display for AttachMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachMode::Skb => write!(f, "skb"),
            AttachMode::Native => write!(f, "native"),
            AttachMode::Hw => write!(f, "hw"),
            AttachMode::Unspec => write!(f, "unspec"),
        }
    }
}

/// Ambient, optional configuration giving a default [`AttachMode`] per
/// interface name, so callers of this library don't have to hardcode a
/// mode for every interface they manage. `attach()` still
/// takes `mode` explicitly; this is sugar a caller may consult before
/// calling it, not a hidden default path inside `attach()` itself.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    interfaces: Option<HashMap<String, InterfaceConfig>>,
}

impl Config {
    pub fn mode_for_interface(&self, name: &str) -> Option<AttachMode> {
        self.interfaces.as_ref()?.get(name).map(|c| c.mode)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| Error::InvalidArgument(format!("invalid config: {e}")))
    }
}

#[derive(Debug, Deserialize, Copy, Clone)]
struct InterfaceConfig {
    mode: AttachMode,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_from_invalid_string_fails() {
        assert!(Config::from_str("i am a teapot").is_err());
    }

    #[test]
    fn config_single_iface() {
        let input = r#"
        [interfaces]
          [interfaces.eth0]
          mode = "native"
        "#;
        let config = Config::from_str(input).expect("error parsing toml input");
        assert_eq!(config.mode_for_interface("eth0"), Some(AttachMode::Native));
    }

    #[test]
    fn config_multiple_iface() {
        let input = r#"
        [interfaces]
          [interfaces.eth0]
          mode = "native"
          [interfaces.eth1]
          mode = "hw"
          [interfaces.eth2]
          mode = "skb"
        "#;
        let config = Config::from_str(input).expect("error parsing toml input");
        assert_eq!(config.mode_for_interface("eth0"), Some(AttachMode::Native));
        assert_eq!(config.mode_for_interface("eth1"), Some(AttachMode::Hw));
        assert_eq!(config.mode_for_interface("eth2"), Some(AttachMode::Skb));
    }

    #[test]
    fn missing_interface_has_no_default() {
        let config = Config::default();
        assert_eq!(config.mode_for_interface("eth9"), None);
    }

    #[test]
    fn opposite_mode_used_for_remediation() {
        assert_eq!(AttachMode::Skb.opposite(), AttachMode::Native);
        assert_eq!(AttachMode::Native.opposite(), AttachMode::Skb);
        assert_eq!(AttachMode::Hw.opposite(), AttachMode::Skb);
    }
}
