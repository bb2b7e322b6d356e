//! Session controller: the operations the presentation layer calls.
//!
//! A session owns one logical connection to the daemon through the
//! dispatcher worker, the interface registry, and the event log. Wire
//! and codec failures never escalate past here; they convert to one of
//! the client error kinds, land on the status surface, and leave the
//! session usable so the caller can decide to reconnect.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ifctl_proto::{Command, Profile, Response};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::dispatch::{self, Budgets, DispatchHandle};
use crate::error::{Error, Result};
use crate::events::{EventLog, SessionEvent, Severity};
use crate::registry::{InterfaceRegistry, InterfaceSnapshot};
use crate::resolv;
#[cfg(unix)]
use crate::transport::{ShortReadFraming, UnixTransport};
use crate::transport::{ConnectionState, StateCell, Transport};

/// How an interface should obtain its addressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Lease an address over DHCP.
    Dynamic,
    /// Assign the given address manually. All three fields are
    /// required; `apply_settings` refuses empty ones before anything
    /// reaches the wire.
    Static {
        /// IPv4 address to assign.
        ip: String,
        /// Network mask, prefix length or dotted quad.
        mask: String,
        /// Default gateway.
        gateway: String,
    },
}

/// Outcome of one exchange within a multi-step operation.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Tag of the command that was sent.
    pub command: String,
    /// Whether the daemon acknowledged instead of failing.
    pub ok: bool,
    /// Human-readable outcome line.
    pub detail: String,
}

/// Combined outcome of [`Session::apply_settings`].
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// The `on`/`off` step.
    pub toggle: StepOutcome,
    /// The `dhcpOn`/`setStatic` step.
    pub addressing: StepOutcome,
}

impl ApplyReport {
    /// `true` when both steps were acknowledged.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.toggle.ok && self.addressing.ok
    }
}

/// Session construction knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Socket path of the control daemon.
    pub socket: PathBuf,
    /// Wire dialect and capability profile to speak.
    pub profile: Profile,
    /// Per-exchange response budgets.
    pub budgets: Budgets,
    /// resolv.conf-shaped file behind [`Session::dns_servers`].
    pub resolv_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(ifctl_proto::CONTROL_SOCKET),
            profile: Profile::default(),
            budgets: Budgets::default(),
            resolv_path: PathBuf::from(resolv::RESOLV_CONF),
        }
    }
}

/// One logical client session against the daemon.
///
/// Construction only wires the pieces together; nothing touches the
/// socket until [`initialize`](Self::initialize) or
/// [`reconnect`](Self::reconnect). Must be built inside a Tokio
/// runtime, which hosts the dispatcher worker.
#[derive(Debug)]
pub struct Session {
    dispatch: DispatchHandle,
    worker: JoinHandle<()>,
    registry: Arc<Mutex<InterfaceRegistry>>,
    log: EventLog,
    states: StateCell,
    profile: Profile,
    resolv_path: PathBuf,
}

impl Session {
    /// Builds a session over the Unix socket named by `config`.
    #[cfg(unix)]
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let transport = UnixTransport::new(&config.socket, ShortReadFraming::default());
        Self::with_transport(transport, config)
    }

    pub(crate) fn with_transport<T>(transport: T, config: SessionConfig) -> Self
    where
        T: Transport + Send + 'static,
    {
        let states = transport.state_handle();
        let registry = Arc::new(Mutex::new(InterfaceRegistry::default()));
        let log = EventLog::default();
        let (dispatch, worker) = dispatch::spawn(
            transport,
            config.profile,
            config.budgets,
            Arc::clone(&registry),
            log.clone(),
        );
        Self {
            dispatch,
            worker,
            registry,
            log,
            states,
            profile: config.profile,
            resolv_path: config.resolv_path,
        }
    }

    /// Connects and performs the initial enumeration.
    ///
    /// An absent or refusing endpoint reports softly: the failure lands
    /// on the status surface and in the returned `Err`, and the session
    /// stays usable for a later [`reconnect`](Self::reconnect).
    pub async fn initialize(&self) -> Result<()> {
        self.reconnect().await
    }

    /// Closes any open connection, reconnects, and re-enumerates.
    ///
    /// Idempotent. The registry keeps its previous contents until the
    /// fresh enumeration response lands, so a failed reconnect never
    /// empties a listing the caller is still showing.
    pub async fn reconnect(&self) -> Result<()> {
        self.dispatch.close().await?;
        self.noted(self.dispatch.connect().await)?;
        self.enumerate().await.map(|_| ())
    }

    /// Ends the session: closes the socket and stops the worker.
    pub async fn shutdown(self) {
        let Session { dispatch, worker, .. } = self;
        let _ = dispatch.close().await;
        drop(dispatch);
        let _ = worker.await;
    }

    /// Asks the daemon for a fresh listing.
    ///
    /// Returns the number of interfaces now in the registry. A daemon
    /// `error` answer keeps the stale listing and reports its text on
    /// the status surface.
    pub async fn enumerate(&self) -> Result<usize> {
        let response = self.noted(self.dispatch.exchange(Command::Enumerate).await)?;
        if let Response::Error(text) = response {
            self.daemon_error(&text);
        }
        Ok(self.registry_len())
    }

    /// Refreshes one interface and returns its snapshot.
    ///
    /// Fails with `NotFound` unless `name` is in the registry. Sends
    /// `status`, then `getIP` when the active profile supports it; a
    /// daemon `error` answer is surfaced and the last-known snapshot is
    /// returned unchanged.
    pub async fn select_interface(&self, name: &str) -> Result<InterfaceSnapshot> {
        if !self.contains(name) {
            return self.noted(Err(Error::NotFound(name.to_owned())));
        }

        let status = Command::Status { iface: name.to_owned() };
        if let Response::Error(text) = self.noted(self.dispatch.exchange(status).await)? {
            self.daemon_error(&text);
        }
        if self.profile.supports_get_ip {
            let get_ip = Command::GetIp { iface: name.to_owned() };
            if let Response::Error(text) = self.noted(self.dispatch.exchange(get_ip).await)? {
                self.daemon_error(&text);
            }
        }

        // A push may have removed the entry while we were refreshing.
        self.noted(self.interface(name).ok_or_else(|| Error::NotFound(name.to_owned())))
    }

    /// Administratively enables or disables one interface.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<StepOutcome> {
        if !self.contains(name) {
            return self.noted(Err(Error::NotFound(name.to_owned())));
        }
        let command = if enabled {
            Command::On { iface: name.to_owned() }
        } else {
            Command::Off { iface: name.to_owned() }
        };
        match self.step(command).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.noted(Err(e)),
        }
    }

    /// Applies an enable/disable intent plus addressing in one flow.
    ///
    /// Sequences exactly two exchanges: the toggle first, then the
    /// addressing command, the second issued only once the first has
    /// resolved. Both outcomes are recorded and returned. Static
    /// addressing with any empty field fails with `IncompleteInput`
    /// before anything is written to the wire.
    pub async fn apply_settings(
        &self,
        name: &str,
        enabled: bool,
        addressing: Addressing,
    ) -> Result<ApplyReport> {
        if let Addressing::Static { ip, mask, gateway } = &addressing {
            if ip.is_empty() {
                return self.noted(Err(Error::IncompleteInput("ip address")));
            }
            if mask.is_empty() {
                return self.noted(Err(Error::IncompleteInput("mask")));
            }
            if gateway.is_empty() {
                return self.noted(Err(Error::IncompleteInput("gateway")));
            }
        }
        if !self.contains(name) {
            return self.noted(Err(Error::NotFound(name.to_owned())));
        }

        let toggle_cmd = if enabled {
            Command::On { iface: name.to_owned() }
        } else {
            Command::Off { iface: name.to_owned() }
        };
        let toggle = match self.step(toggle_cmd).await {
            Ok(outcome) => outcome,
            // Busy means nothing was sent; abort instead of issuing the
            // addressing command out of sequence.
            Err(e) => return self.noted(Err(e)),
        };

        let addressing_cmd = match addressing {
            Addressing::Dynamic => Command::DhcpOn {
                iface: name.to_owned(),
                hint: self.interface(name).map(|s| s.record),
            },
            Addressing::Static { ip, mask, gateway } => Command::SetStatic {
                iface: name.to_owned(),
                address: ip,
                mask,
                gateway,
            },
        };
        let tag = addressing_cmd.tag();
        let addressing = match self.step(addressing_cmd).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log.record(Severity::Error, format!("{tag}: {e}"));
                StepOutcome { command: tag.to_string(), ok: false, detail: e.to_string() }
            }
        };

        Ok(ApplyReport { toggle, addressing })
    }

    /// Stops DHCP on one interface.
    pub async fn disable_dhcp(&self, name: &str) -> Result<StepOutcome> {
        if !self.contains(name) {
            return self.noted(Err(Error::NotFound(name.to_owned())));
        }
        match self.step(Command::DhcpOff { iface: name.to_owned() }).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.noted(Err(e)),
        }
    }

    /// Interface names in first-seen order.
    #[must_use]
    pub fn interfaces(&self) -> Vec<String> {
        self.registry.lock().map(|r| r.names()).unwrap_or_default()
    }

    /// Snapshots of every known interface, in first-seen order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<InterfaceSnapshot> {
        self.registry.lock().map(|r| r.snapshot()).unwrap_or_default()
    }

    /// Snapshot of one interface, if known.
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<InterfaceSnapshot> {
        self.registry.lock().ok().and_then(|r| r.get(name).cloned())
    }

    /// Current connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.states.get()
    }

    /// Most recent status line, if anything has happened yet.
    #[must_use]
    pub fn status(&self) -> Option<SessionEvent> {
        self.log.last()
    }

    /// Snapshot of the session event log, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SessionEvent> {
        self.log.snapshot()
    }

    /// Fallback DNS servers from the configured resolv.conf path.
    pub fn dns_servers(&self) -> io::Result<Vec<String>> {
        resolv::nameservers(&self.resolv_path)
    }

    /// Runs one exchange and folds its outcome into a [`StepOutcome`].
    ///
    /// `Busy` is the only error handed back raw: it means the command
    /// never reached the wire, which multi-step callers treat
    /// differently from a resolved failure.
    async fn step(&self, command: Command) -> Result<StepOutcome> {
        let tag = command.tag();
        match self.dispatch.exchange(command).await {
            Err(Error::Busy) => Err(Error::Busy),
            Err(e) => {
                tracing::warn!(command = %tag, error = %e, "exchange failed");
                self.log.record(Severity::Error, format!("{tag}: {e}"));
                Ok(StepOutcome { command: tag.to_string(), ok: false, detail: e.to_string() })
            }
            Ok(Response::Error(text)) => {
                let detail = format!("daemon error: {text}");
                self.log.record(Severity::Error, format!("{tag}: {detail}"));
                Ok(StepOutcome { command: tag.to_string(), ok: false, detail })
            }
            Ok(response) => {
                let detail = summary(&response);
                self.log.record(Severity::Info, format!("{tag}: {detail}"));
                Ok(StepOutcome { command: tag.to_string(), ok: true, detail })
            }
        }
    }

    /// Records a failure on the status surface before handing it back.
    fn noted<T>(&self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "session operation failed");
            self.log.record(Severity::Error, e.to_string());
        }
        outcome
    }

    fn daemon_error(&self, text: &str) {
        tracing::warn!(text, "daemon reported an error");
        self.log.record(Severity::Error, format!("daemon error: {text}"));
    }

    fn contains(&self, name: &str) -> bool {
        self.registry.lock().map(|r| r.contains(name)).unwrap_or(false)
    }

    fn registry_len(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }
}

/// One human-readable line for a settled response.
fn summary(response: &Response) -> String {
    match response {
        Response::Enumerate(listing) => format!("{} interface(s)", listing.records.len()),
        Response::Status { iface, link } => format!("{iface} is {link}"),
        Response::GetIp(report) => match &report.address {
            Some(addr) => format!("{} has {}{}", report.iface, addr, mask_suffix(report.mask.as_ref())),
            None => format!("{} has no address", report.iface),
        },
        Response::On(text) | Response::Off(text) | Response::DhcpOff(text) => text.clone(),
        Response::DhcpOn(report) => match report.address() {
            Some(addr) => {
                format!("{} leased {}{}", report.iface(), addr, mask_suffix(report.mask()))
            }
            None => format!("{} obtained no lease", report.iface()),
        },
        Response::SetStatic(ack) => {
            let mut line = format!("{} set to {}/{}", ack.iface, ack.address, ack.mask);
            if let Some(gw) = &ack.gateway {
                line.push_str(&format!(" via {gw}"));
            }
            line
        }
        Response::Event { kind, record } => format!("push: {} {}", kind.tag(), record.name),
        Response::Error(text) => format!("daemon error: {text}"),
        _ => "unrecognized response".to_owned(),
    }
}

fn mask_suffix(mask: Option<&ifctl_proto::Mask>) -> String {
    mask.map(|m| format!("/{m}")).unwrap_or_default()
}
