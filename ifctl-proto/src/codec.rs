//! Textual s-expression codec: `(<tag>(<payload>))`.
//!
//! The stream is unframed and shared with unsolicited daemon events, so
//! decoding starts from a raw read burst: [`decode_burst`] splits it into
//! balanced-parenthesis groups and [`decode`] handles one group. Grammar
//! failures become [`Decoded::Malformed`] values rather than errors — the
//! daemon keeps talking after sending junk, and so must we.

use crate::message::{
    AddressReport, Command, DhcpReport, Enumeration, EventKind, InterfaceRecord, LinkState, Mask,
    Response, StaticAck, Tag,
};
use crate::profile::{Dialect, Profile};

/// Wire sentinel for an absent field value.
const NONE: &str = "none";

/// Outcome of decoding one wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Decoded {
    /// A well-formed daemon message.
    Message(Response),
    /// Bytes that failed the grammar, kept verbatim for diagnostics.
    Malformed(String),
}

/// Encodes `cmd` for the wire under `profile`.
pub fn encode(cmd: &Command, profile: Profile) -> String {
    match cmd {
        Command::Enumerate => "(enumerate())".to_owned(),
        Command::Status { iface } => format!("(status({iface}))"),
        Command::GetIp { iface } => format!("(getIP({iface}))"),
        Command::On { iface } => format!("(on({iface}))"),
        Command::Off { iface } => format!("(off({iface}))"),
        Command::DhcpOn { iface, hint } => match profile.dialect {
            Dialect::Delimited => format!("(dhcpOn({iface}))"),
            Dialect::KeyValue => {
                let addr = hint.as_ref().and_then(|r| r.address.as_deref()).unwrap_or(NONE);
                let mac = hint.as_ref().and_then(|r| r.mac.as_deref()).unwrap_or(NONE);
                let gateway = hint.as_ref().and_then(|r| r.gateway.as_deref()).unwrap_or(NONE);
                let mask = hint
                    .as_ref()
                    .and_then(|r| r.mask.as_ref())
                    .map_or_else(|| NONE.to_owned(), ToString::to_string);
                let flag = hint.as_ref().map_or(NONE, |r| r.flags.as_str());
                format!(
                    "(dhcpOn(iface={iface} addr={addr} mac={mac} gateway={gateway} \
                     mask={mask} flag={flag}))"
                )
            }
        },
        Command::DhcpOff { iface } => format!("(dhcpOff({iface}))"),
        Command::SetStatic { iface, address, mask, gateway } => {
            format!("(setStatic({iface},{address},{mask},{gateway}))")
        }
    }
}

/// Splits a read burst into balanced groups and decodes each one.
///
/// Bytes outside any group, and an unbalanced tail (typically a message
/// truncated by a short read), come back as [`Decoded::Malformed`].
pub fn decode_burst(buf: &[u8], profile: Profile) -> Vec<Decoded> {
    let text = String::from_utf8_lossy(buf);
    let s: &str = &text;
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < s.len() {
        let rem = &s[pos..];
        let lead = rem.len() - rem.trim_start().len();
        pos += lead;
        if pos >= s.len() {
            break;
        }
        if s[pos..].starts_with('(') {
            match matching_paren(&s[pos..]) {
                Some(close) => {
                    out.push(decode(&s[pos..=pos + close], profile));
                    pos += close + 1;
                }
                None => {
                    out.push(Decoded::Malformed(s[pos..].trim().to_owned()));
                    break;
                }
            }
        } else {
            let end = s[pos..].find('(').map_or(s.len(), |i| pos + i);
            out.push(Decoded::Malformed(s[pos..end].trim().to_owned()));
            pos = end;
        }
    }
    out
}

/// Decodes a single `(<tag>(<payload>))` message.
pub fn decode(text: &str, profile: Profile) -> Decoded {
    match try_decode(text, profile) {
        Some(resp) => Decoded::Message(resp),
        None => Decoded::Malformed(text.trim().to_owned()),
    }
}

fn try_decode(text: &str, profile: Profile) -> Option<Response> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix('(')?.strip_suffix(')')?;
    let open = inner.find('(')?;
    let (tag_str, rest) = inner.split_at(open);
    let tag = Tag::parse(tag_str.trim())?;
    let close = matching_paren(rest)?;
    if !rest[close + 1..].trim().is_empty() {
        return None;
    }
    let payload = &rest[1..close];

    Some(match tag {
        Tag::Enumerate => Response::Enumerate(decode_enumeration(strip_echo(tag, payload))),
        Tag::Status => {
            let fields: Vec<&str> = strip_echo(tag, payload).split(',').collect();
            let [iface, state] = fields[..] else { return None };
            let iface = iface.trim();
            if iface.is_empty() {
                return None;
            }
            Response::Status { iface: iface.to_owned(), link: LinkState::parse(state.trim())? }
        }
        Tag::GetIp => Response::GetIp(decode_report(strip_echo(tag, payload))?),
        Tag::On => Response::On(payload.to_owned()),
        Tag::Off => Response::Off(payload.to_owned()),
        Tag::DhcpOn => {
            let p = strip_echo(tag, payload);
            Response::DhcpOn(match profile.dialect {
                Dialect::Delimited => DhcpReport::Report(decode_report(p)?),
                Dialect::KeyValue => DhcpReport::Record(decode_record(p)?),
            })
        }
        Tag::DhcpOff => Response::DhcpOff(payload.to_owned()),
        Tag::SetStatic => Response::SetStatic(decode_static_ack(strip_echo(tag, payload))?),
        Tag::AddIface
        | Tag::DelIface
        | Tag::AddAddr
        | Tag::DelAddr
        | Tag::AddRoute
        | Tag::DelRoute => Response::Event {
            kind: EventKind::from_tag(tag)?,
            record: decode_record(payload)?,
        },
        Tag::Error => Response::Error(payload.to_owned()),
    })
}

/// Byte index of the `)` matching the `(` that `s` starts with.
///
/// Parentheses inside double quotes do not count, matching the daemon's
/// own tokenizer.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips a tag-echo wrapper when present.
///
/// Some daemon builds serialize the already-tagged payload a second time,
/// producing `(enumerate(enumerate(...)))`. Free-form payloads are never
/// passed through here.
fn strip_echo(tag: Tag, payload: &str) -> &str {
    let trimmed = payload.trim();
    let Some(rest) = trimmed.strip_prefix(tag.as_str()) else {
        return payload;
    };
    if !rest.starts_with('(') {
        return payload;
    }
    match matching_paren(rest) {
        Some(close) if close == rest.len() - 1 => &rest[1..close],
        _ => payload,
    }
}

fn optional(v: &str) -> Option<String> {
    (!v.is_empty() && v != NONE).then(|| v.to_owned())
}

/// Accumulates one record's `key=value` tokens.
#[derive(Default)]
struct RecordFields<'a> {
    raw: Vec<&'a str>,
    iface: Option<&'a str>,
    addr: Option<&'a str>,
    mac: Option<&'a str>,
    gateway: Option<&'a str>,
    mask: Option<&'a str>,
    flag: Option<&'a str>,
    tainted: bool,
}

impl<'a> RecordFields<'a> {
    fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn push(&mut self, token: &'a str) {
        self.raw.push(token);
        match token.split_once('=') {
            Some(("iface", v)) => self.iface = Some(v),
            Some(("addr", v)) => self.addr = Some(v),
            Some(("mac", v)) => self.mac = Some(v),
            Some(("gateway", v)) => self.gateway = Some(v),
            Some(("mask", v)) => self.mask = Some(v),
            Some(("flag", v)) => self.flag = Some(v),
            // Unknown keys from newer daemons are tolerated.
            Some(_) => {}
            None => self.tainted = true,
        }
    }

    /// All six keys present and a non-empty name, or the raw text back.
    fn finish(self) -> Result<InterfaceRecord, String> {
        let raw = self.raw.join(" ");
        if self.tainted {
            return Err(raw);
        }
        match (self.iface, self.addr, self.mac, self.gateway, self.mask, self.flag) {
            (Some(name), Some(addr), Some(mac), Some(gateway), Some(mask), Some(flag))
                if !name.is_empty() =>
            {
                Ok(InterfaceRecord {
                    name: name.to_owned(),
                    address: optional(addr),
                    mac: optional(mac),
                    gateway: optional(gateway),
                    mask: optional(mask).and_then(|m| Mask::parse(&m)),
                    flags: flag.to_owned(),
                })
            }
            _ => Err(raw),
        }
    }
}

/// Decodes an `enumerate` payload.
///
/// Records are separated by a comma or simply by the next `iface=` key,
/// both of which appear in the field. Each record is accepted or rejected
/// on its own.
fn decode_enumeration(payload: &str) -> Enumeration {
    let mut out = Enumeration::default();
    let mut current = RecordFields::default();
    for token in payload.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if token.starts_with("iface=") && !current.is_empty() {
            flush(&mut out, std::mem::take(&mut current));
        }
        current.push(token);
    }
    if !current.is_empty() {
        flush(&mut out, current);
    }
    out
}

fn flush(out: &mut Enumeration, fields: RecordFields<'_>) {
    match fields.finish() {
        Ok(rec) => out.records.push(rec),
        Err(raw) => out.rejected.push(raw),
    }
}

/// Decodes a payload that must hold exactly one clean record.
fn decode_record(payload: &str) -> Option<InterfaceRecord> {
    let mut e = decode_enumeration(payload);
    if e.records.len() == 1 && e.rejected.is_empty() { e.records.pop() } else { None }
}

/// Decodes the five-field colon report of `getIP` and delimited `dhcpOn`.
fn decode_report(payload: &str) -> Option<AddressReport> {
    let fields: Vec<&str> = payload.split(':').collect();
    let [iface, addr, mask, state, gateway] = fields[..] else {
        return None;
    };
    if iface.is_empty() || state.is_empty() {
        return None;
    }
    Some(AddressReport {
        iface: iface.to_owned(),
        address: optional(addr),
        mask: optional(mask).and_then(|m| Mask::parse(&m)),
        state: state.to_owned(),
        gateway: optional(gateway),
    })
}

/// Decodes the four-field comma echo of `setStatic`.
fn decode_static_ack(payload: &str) -> Option<StaticAck> {
    let fields: Vec<&str> = payload.split(',').collect();
    let [iface, address, mask, gateway] = fields[..] else {
        return None;
    };
    if iface.is_empty() || address.is_empty() || address == NONE || gateway.is_empty() {
        return None;
    }
    let mask = optional(mask).and_then(|m| Mask::parse(&m))?;
    Some(StaticAck {
        iface: iface.to_owned(),
        address: address.to_owned(),
        mask,
        gateway: optional(gateway),
    })
}
