//! Wire protocol for the sdz network-configuration daemon.
//!
//! Every message is a textual s-expression `(<tag>(<payload>))` carried
//! over an unframed Unix-socket stream. Unsolicited daemon events share
//! the stream with request/response exchanges, so a single read burst may
//! contain several concatenated messages; [`decode_burst`] splits and
//! decodes them individually. Payload grammars vary across daemon
//! generations — a [`Profile`] selects the dialect once, at session setup.

mod codec;
mod message;
mod profile;

pub use codec::{Decoded, decode, decode_burst, encode};
pub use message::{
    AddressReport, CONTROL_SOCKET, Command, DhcpReport, Enumeration, EventKind, InterfaceRecord,
    LinkState, Mask, Response, StaticAck, Tag,
};
pub use profile::{Dialect, Profile};
