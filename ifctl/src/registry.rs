//! Process-local cache of interface records.
//!
//! The registry mirrors what the daemon has told us so far. Entries are
//! keyed by interface name and kept in first-seen order, which drives
//! default selection in listings. Every entry originates from a decoded
//! daemon message; the client never invents interface names on its own.

use ifctl_proto::{EventKind, InterfaceRecord, LinkState, Mask};
use serde::Serialize;

/// One cached interface: the last wire record plus the link state
/// learned from the most recent `status` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceSnapshot {
    /// Last record received for this interface.
    #[serde(flatten)]
    pub record: InterfaceRecord,
    /// Administrative state from `status`, absent until first refresh.
    pub link: Option<LinkState>,
}

impl InterfaceSnapshot {
    fn new(record: InterfaceRecord) -> Self {
        Self { record, link: None }
    }

    /// Interface name, the registry key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }
}

/// Ordered name-to-record cache, rebuilt on each successful enumeration
/// and patched in place by daemon pushes between enumerations.
#[derive(Debug, Default)]
pub(crate) struct InterfaceRegistry {
    entries: Vec<InterfaceSnapshot>,
}

impl InterfaceRegistry {
    /// Drops every entry.
    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops all entries and installs `records` in the order given.
    ///
    /// Duplicate names within one enumeration collapse onto the first
    /// occurrence, keeping its position. Link states start over.
    pub(crate) fn replace_all(&mut self, records: Vec<InterfaceRecord>) {
        self.clear();
        for record in records {
            self.upsert(record);
        }
    }

    /// Inserts `record`, or overwrites the record of the entry with the
    /// same name in place so first-seen order and any known link state
    /// are preserved.
    pub(crate) fn upsert(&mut self, record: InterfaceRecord) {
        match self.slot(&record.name) {
            Some(slot) => slot.record = record,
            None => self.entries.push(InterfaceSnapshot::new(record)),
        }
    }

    /// Removes the named entry, returning whether it existed.
    fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.record.name != name);
        self.entries.len() != before
    }

    /// Overwrites the record of an existing entry. Unlike
    /// [`upsert`](Self::upsert) this never creates one, so pushes about
    /// pseudo-interfaces (route updates report names like `route0`)
    /// cannot grow the listing.
    fn refresh(&mut self, record: InterfaceRecord) -> bool {
        match self.slot(&record.name) {
            Some(slot) => {
                slot.record = record;
                true
            }
            None => false,
        }
    }

    /// Applies one daemon push. Only `add_iface` may create an entry;
    /// `del_iface` removes; everything else patches an existing entry
    /// or is dropped. Returns whether the registry changed.
    pub(crate) fn apply_event(&mut self, kind: EventKind, record: InterfaceRecord) -> bool {
        match kind {
            EventKind::IfaceAdded => {
                self.upsert(record);
                true
            }
            EventKind::IfaceRemoved => self.remove(&record.name),
            EventKind::AddrAdded
            | EventKind::AddrRemoved
            | EventKind::RouteAdded
            | EventKind::RouteRemoved => self.refresh(record),
            _ => false,
        }
    }

    /// Records the link state from a `status` answer.
    pub(crate) fn set_link(&mut self, name: &str, link: LinkState) -> bool {
        match self.slot(name) {
            Some(slot) => {
                slot.link = Some(link);
                true
            }
            None => false,
        }
    }

    /// Replaces the addressing fields of an existing entry, for address
    /// reports and static-configuration echoes that carry no MAC or
    /// flag word.
    pub(crate) fn update_addressing(
        &mut self,
        name: &str,
        address: Option<String>,
        mask: Option<Mask>,
        gateway: Option<String>,
    ) -> bool {
        match self.slot(name) {
            Some(slot) => {
                slot.record.address = address;
                slot.record.mask = mask;
                slot.record.gateway = gateway;
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&InterfaceSnapshot> {
        self.entries.iter().find(|e| e.record.name == name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Interface names in first-seen order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.record.name.clone()).collect()
    }

    /// Clones the current entries in first-seen order.
    pub(crate) fn snapshot(&self) -> Vec<InterfaceSnapshot> {
        self.entries.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn slot(&mut self, name: &str) -> Option<&mut InterfaceSnapshot> {
        self.entries.iter_mut().find(|e| e.record.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, address: Option<&str>) -> InterfaceRecord {
        InterfaceRecord {
            name: name.into(),
            address: address.map(Into::into),
            mac: Some("aa:bb:cc:dd:ee:ff".into()),
            gateway: None,
            mask: None,
            flags: "00010049".into(),
        }
    }

    #[test]
    fn replace_all_keeps_first_seen_order() {
        let mut reg = InterfaceRegistry::default();
        reg.replace_all(vec![record("eth1", None), record("eth0", None), record("wlan0", None)]);
        assert_eq!(reg.names(), vec!["eth1", "eth0", "wlan0"]);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn upsert_overwrites_in_place_and_keeps_link() {
        let mut reg = InterfaceRegistry::default();
        reg.replace_all(vec![record("eth0", None), record("eth1", None)]);
        assert!(reg.set_link("eth0", LinkState::Up));
        reg.upsert(record("eth0", Some("10.0.0.5")));
        assert_eq!(reg.names(), vec!["eth0", "eth1"]);
        let eth0 = reg.get("eth0").unwrap();
        assert_eq!(eth0.record.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(eth0.link, Some(LinkState::Up));
    }

    #[test]
    fn replace_all_resets_link_state() {
        let mut reg = InterfaceRegistry::default();
        reg.replace_all(vec![record("eth0", None)]);
        assert!(reg.set_link("eth0", LinkState::Down));
        reg.replace_all(vec![record("eth0", None)]);
        assert_eq!(reg.get("eth0").unwrap().link, None);
    }

    #[test]
    fn add_event_creates_and_del_event_removes() {
        let mut reg = InterfaceRegistry::default();
        assert!(reg.apply_event(EventKind::IfaceAdded, record("usb0", None)));
        assert!(reg.contains("usb0"));
        assert!(reg.apply_event(EventKind::IfaceRemoved, record("usb0", None)));
        assert!(!reg.contains("usb0"));
        assert!(!reg.apply_event(EventKind::IfaceRemoved, record("usb0", None)));
    }

    #[test]
    fn route_events_never_create_entries() {
        let mut reg = InterfaceRegistry::default();
        reg.replace_all(vec![record("eth0", None)]);
        assert!(!reg.apply_event(EventKind::RouteAdded, record("route0", None)));
        assert_eq!(reg.names(), vec!["eth0"]);

        let mut patched = record("eth0", Some("10.0.0.9"));
        patched.gateway = Some("10.0.0.1".into());
        assert!(reg.apply_event(EventKind::AddrAdded, patched));
        assert_eq!(reg.get("eth0").unwrap().record.address.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn status_for_unknown_interface_is_dropped() {
        let mut reg = InterfaceRegistry::default();
        assert!(!reg.set_link("eth9", LinkState::Up));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn update_addressing_replaces_all_three_fields() {
        let mut reg = InterfaceRegistry::default();
        let mut seeded = record("eth0", Some("10.0.0.5"));
        seeded.gateway = Some("10.0.0.1".into());
        reg.replace_all(vec![seeded]);

        assert!(reg.update_addressing("eth0", None, Some(Mask::Prefix(24)), None));
        let entry = reg.get("eth0").unwrap();
        assert_eq!(entry.record.address, None);
        assert_eq!(entry.record.mask, Some(Mask::Prefix(24)));
        assert_eq!(entry.record.gateway, None);

        assert!(!reg.update_addressing("eth9", None, None, None));
    }
}
