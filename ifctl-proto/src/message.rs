//! Protocol message types for the daemon control channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default Unix-socket path of the control daemon.
pub const CONTROL_SOCKET: &str = "/sdz/control_sock";

/// Message tag, the leading atom of every `(<tag>(<payload>))` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Full interface listing.
    Enumerate,
    /// Administrative link state of one interface.
    Status,
    /// Address report for one interface.
    GetIp,
    /// Enable an interface.
    On,
    /// Disable an interface.
    Off,
    /// Start DHCP on an interface.
    DhcpOn,
    /// Stop DHCP on an interface.
    DhcpOff,
    /// Assign a static address.
    SetStatic,
    /// Daemon push: an interface appeared.
    AddIface,
    /// Daemon push: an interface vanished.
    DelIface,
    /// Daemon push: an address was assigned.
    AddAddr,
    /// Daemon push: an address was removed.
    DelAddr,
    /// Daemon push: a route was installed.
    AddRoute,
    /// Daemon push: a route was withdrawn.
    DelRoute,
    /// Daemon-reported failure; settles whatever exchange it answers.
    Error,
}

impl Tag {
    /// Wire spelling of the tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enumerate => "enumerate",
            Self::Status => "status",
            Self::GetIp => "getIP",
            Self::On => "on",
            Self::Off => "off",
            Self::DhcpOn => "dhcpOn",
            Self::DhcpOff => "dhcpOff",
            Self::SetStatic => "setStatic",
            Self::AddIface => "add_iface",
            Self::DelIface => "del_iface",
            Self::AddAddr => "add_addr",
            Self::DelAddr => "del_addr",
            Self::AddRoute => "add_route",
            Self::DelRoute => "del_route",
            Self::Error => "error",
        }
    }

    /// Parses a wire tag; unknown spellings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "enumerate" => Self::Enumerate,
            "status" => Self::Status,
            "getIP" => Self::GetIp,
            "on" => Self::On,
            "off" => Self::Off,
            "dhcpOn" => Self::DhcpOn,
            "dhcpOff" => Self::DhcpOff,
            "setStatic" => Self::SetStatic,
            "add_iface" => Self::AddIface,
            "del_iface" => Self::DelIface,
            "add_addr" => Self::AddAddr,
            "del_addr" => Self::DelAddr,
            "add_route" => Self::AddRoute,
            "del_route" => Self::DelRoute,
            "error" => Self::Error,
            _ => return None,
        })
    }

    /// `true` for unsolicited daemon pushes.
    pub const fn is_event(self) -> bool {
        matches!(
            self,
            Self::AddIface
                | Self::DelIface
                | Self::AddAddr
                | Self::DelAddr
                | Self::AddRoute
                | Self::DelRoute
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network mask as the daemon reports it.
///
/// Early daemon generations send a dotted quad, later ones a bare prefix
/// length. Both shapes are preserved as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Mask {
    /// CIDR prefix length, e.g. `24`.
    Prefix(u8),
    /// Dotted-quad form, e.g. `255.255.255.0`.
    Dotted(String),
}

impl Mask {
    /// Parses a wire mask field. Empty input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        match s.parse::<u8>() {
            Ok(n) if n <= 32 => Some(Self::Prefix(n)),
            _ => Some(Self::Dotted(s.to_owned())),
        }
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(n) => write!(f, "{n}"),
            Self::Dotted(s) => f.write_str(s),
        }
    }
}

/// Administrative link state reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Interface is administratively up.
    Up,
    /// Interface is administratively down.
    Down,
}

impl LinkState {
    /// Wire spelling (`up` / `down`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Parses the wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One interface record as carried by `enumerate` and event payloads.
///
/// Six `key=value` fields on the wire; `none` marks an absent value and
/// maps to `None` here. `flags` is the daemon's opaque eight-hex-digit
/// flag word — link state is never derived from it, only from `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    /// Interface name, e.g. `eth0`. Never empty.
    pub name: String,
    /// Primary IPv4 address, if assigned.
    pub address: Option<String>,
    /// Hardware address as reported (colon- or dash-separated, per
    /// daemon generation).
    pub mac: Option<String>,
    /// Default gateway, if known.
    pub gateway: Option<String>,
    /// Network mask, if assigned.
    pub mask: Option<Mask>,
    /// Opaque interface flag word.
    pub flags: String,
}

/// Decoded `enumerate` payload.
///
/// A record missing one of the six required keys is rejected on its own;
/// the surrounding records still decode. Zero records is a valid listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    /// Records that parsed cleanly, in wire order.
    pub records: Vec<InterfaceRecord>,
    /// Raw text of records that failed the six-field grammar.
    pub rejected: Vec<String>,
}

/// Address report carried by `getIP` and delimited-dialect `dhcpOn`
/// replies: five colon-separated fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressReport {
    /// Interface the report describes.
    pub iface: String,
    /// Assigned address, if any.
    pub address: Option<String>,
    /// Network mask, if any.
    pub mask: Option<Mask>,
    /// Lease or link state word as sent (`bound`, `timeout`, ...).
    pub state: String,
    /// Gateway, if any.
    pub gateway: Option<String>,
}

/// Echo of an applied static configuration: four comma-separated fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAck {
    /// Interface the configuration was applied to.
    pub iface: String,
    /// Address that was set.
    pub address: String,
    /// Mask that was set.
    pub mask: Mask,
    /// Gateway that was set. The daemon accepts gateway-less segments,
    /// reported as `none`.
    pub gateway: Option<String>,
}

/// Kind of unsolicited daemon push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EventKind {
    /// `add_iface`: interface appeared.
    IfaceAdded,
    /// `del_iface`: interface vanished.
    IfaceRemoved,
    /// `add_addr`: address assigned.
    AddrAdded,
    /// `del_addr`: address removed.
    AddrRemoved,
    /// `add_route`: route installed.
    RouteAdded,
    /// `del_route`: route withdrawn.
    RouteRemoved,
}

impl EventKind {
    /// Maps an event tag to its kind; `None` for non-event tags.
    pub const fn from_tag(tag: Tag) -> Option<Self> {
        Some(match tag {
            Tag::AddIface => Self::IfaceAdded,
            Tag::DelIface => Self::IfaceRemoved,
            Tag::AddAddr => Self::AddrAdded,
            Tag::DelAddr => Self::AddrRemoved,
            Tag::AddRoute => Self::RouteAdded,
            Tag::DelRoute => Self::RouteRemoved,
            _ => return None,
        })
    }

    /// Tag this kind arrives under.
    pub const fn tag(self) -> Tag {
        match self {
            Self::IfaceAdded => Tag::AddIface,
            Self::IfaceRemoved => Tag::DelIface,
            Self::AddrAdded => Tag::AddAddr,
            Self::AddrRemoved => Tag::DelAddr,
            Self::RouteAdded => Tag::AddRoute,
            Self::RouteRemoved => Tag::DelRoute,
        }
    }
}

/// Request sent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command {
    /// Ask for the full interface listing.
    Enumerate,
    /// Ask for the administrative link state of one interface.
    Status {
        /// Target interface name.
        iface: String,
    },
    /// Ask for the current address report of one interface.
    ///
    /// Only daemon generations with [`Profile::supports_get_ip`] answer
    /// this; the session guards it, encoding stays total.
    ///
    /// [`Profile::supports_get_ip`]: crate::Profile::supports_get_ip
    GetIp {
        /// Target interface name.
        iface: String,
    },
    /// Enable an interface.
    On {
        /// Target interface name.
        iface: String,
    },
    /// Disable an interface.
    Off {
        /// Target interface name.
        iface: String,
    },
    /// Start DHCP on an interface.
    DhcpOn {
        /// Target interface name.
        iface: String,
        /// Last-known record, used to fill the key=value dialect's
        /// request fields. Ignored by the delimited dialect.
        hint: Option<InterfaceRecord>,
    },
    /// Stop DHCP on an interface.
    DhcpOff {
        /// Target interface name.
        iface: String,
    },
    /// Assign a static address.
    SetStatic {
        /// Target interface name.
        iface: String,
        /// Address to assign.
        address: String,
        /// Mask, prefix length or dotted quad as the caller typed it.
        mask: String,
        /// Gateway address.
        gateway: String,
    },
}

impl Command {
    /// Tag this command is sent under.
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Enumerate => Tag::Enumerate,
            Self::Status { .. } => Tag::Status,
            Self::GetIp { .. } => Tag::GetIp,
            Self::On { .. } => Tag::On,
            Self::Off { .. } => Tag::Off,
            Self::DhcpOn { .. } => Tag::DhcpOn,
            Self::DhcpOff { .. } => Tag::DhcpOff,
            Self::SetStatic { .. } => Tag::SetStatic,
        }
    }

    /// Response tags that settle this command: its own tag plus `error`.
    pub const fn expected_tags(&self) -> [Tag; 2] {
        [self.tag(), Tag::Error]
    }
}

/// Payload of a `dhcpOn` reply; the shape follows the dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DhcpReport {
    /// Five-field colon report (delimited dialect).
    Report(AddressReport),
    /// Six-field key=value record (key=value dialect).
    Record(InterfaceRecord),
}

impl DhcpReport {
    /// Interface the report describes.
    pub fn iface(&self) -> &str {
        match self {
            Self::Report(r) => &r.iface,
            Self::Record(r) => &r.name,
        }
    }

    /// Leased address, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Report(r) => r.address.as_deref(),
            Self::Record(r) => r.address.as_deref(),
        }
    }

    /// Mask, if any.
    pub const fn mask(&self) -> Option<&Mask> {
        match self {
            Self::Report(r) => r.mask.as_ref(),
            Self::Record(r) => r.mask.as_ref(),
        }
    }

    /// Gateway, if any.
    pub fn gateway(&self) -> Option<&str> {
        match self {
            Self::Report(r) => r.gateway.as_deref(),
            Self::Record(r) => r.gateway.as_deref(),
        }
    }
}

/// Decoded daemon message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Response {
    /// Interface listing.
    Enumerate(Enumeration),
    /// Link-state answer for one interface.
    Status {
        /// Interface the answer describes.
        iface: String,
        /// Reported administrative state.
        link: LinkState,
    },
    /// Address report answer.
    GetIp(AddressReport),
    /// Acknowledgment text for `on`.
    On(String),
    /// Acknowledgment text for `off`.
    Off(String),
    /// DHCP outcome report.
    DhcpOn(DhcpReport),
    /// Acknowledgment text for `dhcpOff`.
    DhcpOff(String),
    /// Echo of the applied static configuration.
    SetStatic(StaticAck),
    /// Unsolicited daemon push.
    Event {
        /// What changed.
        kind: EventKind,
        /// Affected interface fields, `none`-stripped.
        record: InterfaceRecord,
    },
    /// Daemon-reported failure text.
    Error(String),
}

impl Response {
    /// Tag this message arrived under.
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Enumerate(_) => Tag::Enumerate,
            Self::Status { .. } => Tag::Status,
            Self::GetIp(_) => Tag::GetIp,
            Self::On(_) => Tag::On,
            Self::Off(_) => Tag::Off,
            Self::DhcpOn(_) => Tag::DhcpOn,
            Self::DhcpOff(_) => Tag::DhcpOff,
            Self::SetStatic(_) => Tag::SetStatic,
            Self::Event { kind, .. } => kind.tag(),
            Self::Error(_) => Tag::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_spellings_roundtrip() {
        let tags = [
            Tag::Enumerate,
            Tag::Status,
            Tag::GetIp,
            Tag::On,
            Tag::Off,
            Tag::DhcpOn,
            Tag::DhcpOff,
            Tag::SetStatic,
            Tag::AddIface,
            Tag::DelIface,
            Tag::AddAddr,
            Tag::DelAddr,
            Tag::AddRoute,
            Tag::DelRoute,
            Tag::Error,
        ];
        for tag in tags {
            assert_eq!(Tag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(Tag::parse("getip"), None, "tags are case-sensitive");
        assert_eq!(Tag::parse(""), None);
    }

    #[test]
    fn event_tags_are_events() {
        assert!(Tag::AddIface.is_event());
        assert!(Tag::DelRoute.is_event());
        assert!(!Tag::Enumerate.is_event());
        assert!(!Tag::Error.is_event());
    }

    #[test]
    fn mask_parses_both_shapes() {
        assert_eq!(Mask::parse("24"), Some(Mask::Prefix(24)));
        assert_eq!(
            Mask::parse("255.255.255.0"),
            Some(Mask::Dotted("255.255.255.0".into()))
        );
        assert_eq!(Mask::parse(""), None);
        // Out-of-range prefix lengths fall back to the opaque form.
        assert_eq!(Mask::parse("64"), Some(Mask::Dotted("64".into())));
    }

    #[test]
    fn expected_tags_pair_own_tag_with_error() {
        let cmd = Command::Status { iface: "eth0".into() };
        assert_eq!(cmd.expected_tags(), [Tag::Status, Tag::Error]);
        assert_eq!(Command::Enumerate.expected_tags(), [Tag::Enumerate, Tag::Error]);
    }
}
