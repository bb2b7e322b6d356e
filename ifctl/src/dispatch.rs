//! Exchange dispatcher.
//!
//! A single worker task owns the transport and the registry write side;
//! callers submit operations through a bounded channel and await a
//! oneshot reply, so no caller is ever blocked on the wire and the
//! protocol stays strictly half-duplex. Routing is a pure function of
//! the decoded message: the pending exchange settles on its own tag or
//! on `error`, unsolicited pushes mutate the registry, and everything
//! else is absorbed for its side effects the way the daemon's earlier
//! clients did (a delayed answer to a timed-out exchange is taken at
//! face value, a known latent risk).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ifctl_proto::{Command, Decoded, Profile, Response, Tag};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::events::{EventLog, Severity};
use crate::registry::InterfaceRegistry;
use crate::transport::Transport;

/// Per-exchange response budgets.
///
/// `dhcpOn`, `dhcpOff` and `setStatic` are served by the daemon waiting
/// on its DHCP helper, which can take tens of seconds; everything else
/// answers quickly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Budget for ordinary commands.
    pub quick: Duration,
    /// Budget for addressing commands.
    pub slow: Duration,
}

impl Budgets {
    fn for_command(&self, command: &Command) -> Duration {
        match command {
            Command::DhcpOn { .. } | Command::DhcpOff { .. } | Command::SetStatic { .. } => {
                self.slow
            }
            _ => self.quick,
        }
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self { quick: Duration::from_secs(10), slow: Duration::from_secs(60) }
    }
}

/// One in-flight request awaiting its answer.
#[derive(Debug)]
struct PendingExchange {
    /// Exact bytes sent, kept for diagnostics.
    request: String,
    issued_at: Instant,
    /// Tags that settle this exchange: the command's own plus `error`.
    expected: [Tag; 2],
}

impl PendingExchange {
    fn matches(&self, tag: Tag) -> bool {
        self.expected.contains(&tag)
    }
}

/// Operations accepted by the worker.
enum Op {
    Connect { reply: oneshot::Sender<Result<()>> },
    Close { reply: oneshot::Sender<()> },
    Exchange { command: Command, reply: oneshot::Sender<Result<Response>> },
}

/// Caller-side handle to the dispatcher worker.
///
/// The channel holds one slot. An exchange submitted while the slot is
/// taken fails fast with [`Error::Busy`]; lifecycle operations queue
/// behind the pending exchange instead.
#[derive(Debug, Clone)]
pub(crate) struct DispatchHandle {
    ops: mpsc::Sender<Op>,
}

impl DispatchHandle {
    /// Submits one exchange and awaits its outcome.
    pub(crate) async fn exchange(&self, command: Command) -> Result<Response> {
        let (reply, outcome) = oneshot::channel();
        self.ops.try_send(Op::Exchange { command, reply }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Busy,
            mpsc::error::TrySendError::Closed(_) => Error::closed(),
        })?;
        outcome.await.map_err(|_| Error::closed())?
    }

    /// Connects (or reconnects) the transport.
    pub(crate) async fn connect(&self) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.ops.send(Op::Connect { reply }).await.map_err(|_| Error::closed())?;
        outcome.await.map_err(|_| Error::closed())?
    }

    /// Closes the transport. Harmless when already closed.
    pub(crate) async fn close(&self) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.ops.send(Op::Close { reply }).await.map_err(|_| Error::closed())?;
        outcome.await.map_err(|_| Error::closed())
    }
}

/// Spawns the worker task that owns `transport` and the registry write
/// side for the life of the session.
pub(crate) fn spawn<T>(
    transport: T,
    profile: Profile,
    budgets: Budgets,
    registry: Arc<Mutex<InterfaceRegistry>>,
    log: EventLog,
) -> (DispatchHandle, JoinHandle<()>)
where
    T: Transport + Send + 'static,
{
    let (ops, inbox) = mpsc::channel(1);
    let worker = Worker { transport, profile, budgets, registry, log, inbox };
    let task = tokio::spawn(worker.run());
    (DispatchHandle { ops }, task)
}

struct Worker<T> {
    transport: T,
    profile: Profile,
    budgets: Budgets,
    registry: Arc<Mutex<InterfaceRegistry>>,
    log: EventLog,
    inbox: mpsc::Receiver<Op>,
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) {
        while let Some(op) = self.inbox.recv().await {
            match op {
                Op::Connect { reply } => {
                    let outcome = self.transport.connect().await;
                    if outcome.is_ok() {
                        self.log.record(Severity::Info, "daemon connection established");
                    }
                    let _ = reply.send(outcome);
                }
                Op::Close { reply } => {
                    self.transport.close().await;
                    let _ = reply.send(());
                }
                Op::Exchange { command, reply } => {
                    let outcome = self.exchange(command).await;
                    let _ = reply.send(outcome);
                }
            }
        }
        // Every handle is gone; release the socket on the way out.
        self.transport.close().await;
    }

    /// Runs one exchange to completion: send, then read bursts until a
    /// settling tag arrives or the budget runs out.
    async fn exchange(&mut self, command: Command) -> Result<Response> {
        let budget = self.budgets.for_command(&command);
        let request = ifctl_proto::encode(&command, self.profile);
        let pending = PendingExchange {
            request,
            issued_at: Instant::now(),
            expected: command.expected_tags(),
        };
        tracing::debug!(request = %pending.request, "exchange started");

        let deadline = pending.issued_at + budget;
        let mut burst =
            match self.transport.send_receive(pending.request.as_bytes(), budget).await {
                Ok(b) => b,
                Err(Error::Timeout { .. }) => return Err(self.timed_out(&pending)),
                Err(e) => return Err(e),
            };
        loop {
            if let Some(response) = self.route_burst(&burst, &pending) {
                tracing::debug!(tag = %response.tag(), "exchange settled");
                return Ok(response);
            }
            // Only unsolicited traffic so far; keep reading until the
            // answer shows up or the budget runs out.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out(&pending));
            }
            burst = match self.transport.receive(remaining).await {
                Ok(b) => b,
                Err(Error::Timeout { .. }) => return Err(self.timed_out(&pending)),
                Err(e) => return Err(e),
            };
        }
    }

    fn timed_out(&self, pending: &PendingExchange) -> Error {
        let elapsed = pending.issued_at.elapsed();
        tracing::warn!(request = %pending.request, ?elapsed, "exchange timed out");
        Error::Timeout { elapsed }
    }

    /// Decodes one burst and routes every item. Returns the message
    /// that settles `pending`, if it arrived.
    fn route_burst(&self, burst: &[u8], pending: &PendingExchange) -> Option<Response> {
        let mut settled = None;
        for item in ifctl_proto::decode_burst(burst, self.profile) {
            match item {
                Decoded::Message(message) => {
                    let settles = settled.is_none() && pending.matches(message.tag());
                    self.absorb(&message);
                    if settles {
                        settled = Some(message);
                    }
                }
                Decoded::Malformed(raw) => {
                    tracing::warn!(raw = %raw, "discarding unreadable message");
                    self.log.record(Severity::Warn, format!("unreadable message: {raw}"));
                }
                // `Decoded` is non-exhaustive; variants unknown to this
                // build carry nothing we could route.
                _ => {}
            }
        }
        settled
    }

    /// Applies one decoded message's registry effect. Messages that are
    /// not answers to the pending exchange still land here, matching
    /// the long-standing accept-whatever-arrives behavior.
    fn absorb(&self, message: &Response) {
        let Ok(mut registry) = self.registry.lock() else { return };
        match message {
            Response::Enumerate(listing) => {
                for raw in &listing.rejected {
                    tracing::warn!(raw = %raw, "rejected enumeration record");
                    self.log.record(Severity::Warn, format!("rejected enumeration record: {raw}"));
                }
                registry.replace_all(listing.records.clone());
                self.log
                    .record(Severity::Info, format!("enumeration: {} interface(s)", registry.len()));
            }
            Response::Status { iface, link } => {
                registry.set_link(iface, *link);
            }
            Response::GetIp(report) => {
                registry.update_addressing(
                    &report.iface,
                    report.address.clone(),
                    report.mask.clone(),
                    report.gateway.clone(),
                );
            }
            Response::DhcpOn(report) => {
                registry.update_addressing(
                    report.iface(),
                    report.address().map(str::to_owned),
                    report.mask().cloned(),
                    report.gateway().map(str::to_owned),
                );
            }
            Response::SetStatic(ack) => {
                registry.update_addressing(
                    &ack.iface,
                    Some(ack.address.clone()),
                    Some(ack.mask.clone()),
                    ack.gateway.clone(),
                );
            }
            Response::Event { kind, record } => {
                let applied = registry.apply_event(*kind, record.clone());
                let mut line = format!("push: {} {}", kind.tag(), record.name);
                if !applied {
                    line.push_str(" (no matching entry)");
                }
                tracing::debug!(tag = %kind.tag(), iface = %record.name, "daemon push");
                self.log.record(Severity::Info, line);
            }
            // Plain acknowledgments and daemon errors carry no registry
            // effect; the session surfaces their text.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use ifctl_proto::LinkState;

    use crate::transport::{ConnectionState, StateCell};

    /// Scripted transport: pops one result per read call and captures
    /// every request.
    struct FakeTransport {
        script: VecDeque<Result<Vec<u8>>>,
        sent: Arc<Mutex<Vec<String>>>,
        reply_delay: Option<Duration>,
        state: StateCell,
    }

    impl FakeTransport {
        fn new(script: Vec<Result<Vec<u8>>>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let fake = Self {
                script: script.into(),
                sent: Arc::clone(&sent),
                reply_delay: None,
                state: StateCell::default(),
            };
            (fake, sent)
        }

        fn next_burst(&mut self) -> Result<Vec<u8>> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(Error::Timeout { elapsed: Duration::ZERO }))
        }
    }

    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<()> {
            self.state.set(ConnectionState::Ready);
            Ok(())
        }

        async fn send_receive(&mut self, request: &[u8], _budget: Duration) -> Result<Vec<u8>> {
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(request).into_owned());
            if let Some(delay) = self.reply_delay {
                tokio::time::sleep(delay).await;
            }
            self.next_burst()
        }

        async fn receive(&mut self, _budget: Duration) -> Result<Vec<u8>> {
            self.next_burst()
        }

        async fn close(&mut self) {
            self.state.set(ConnectionState::Disconnected);
        }

        fn state_handle(&self) -> StateCell {
            self.state.clone()
        }
    }

    fn harness(
        script: Vec<Result<Vec<u8>>>,
    ) -> (DispatchHandle, Arc<Mutex<InterfaceRegistry>>, EventLog, Arc<Mutex<Vec<String>>>) {
        let (fake, sent) = FakeTransport::new(script);
        let registry = Arc::new(Mutex::new(InterfaceRegistry::default()));
        let log = EventLog::default();
        let (handle, _task) = spawn(
            fake,
            Profile::CURRENT,
            Budgets::default(),
            Arc::clone(&registry),
            log.clone(),
        );
        (handle, registry, log, sent)
    }

    #[tokio::test]
    async fn enumeration_settles_and_rebuilds_the_registry() {
        let burst = b"(enumerate(iface=eth0 addr=10.0.0.5 mac=aa:bb:cc:dd:ee:ff \
                      gateway=10.0.0.1 mask=24 flag=00010049))"
            .to_vec();
        let (handle, registry, _log, sent) = harness(vec![Ok(burst)]);

        let response = handle.exchange(Command::Enumerate).await.unwrap();
        assert!(matches!(response, Response::Enumerate(_)));
        assert_eq!(registry.lock().unwrap().names(), vec!["eth0"]);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], "(enumerate())");
    }

    #[tokio::test]
    async fn daemon_error_settles_without_touching_the_registry() {
        let (handle, registry, _log, _sent) =
            harness(vec![Ok(b"(error(no such interface))".to_vec())]);

        let response =
            handle.exchange(Command::Status { iface: "eth9".into() }).await.unwrap();
        assert_eq!(response, Response::Error("no such interface".into()));
        assert_eq!(registry.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn leading_pushes_are_absorbed_before_the_answer() {
        // One burst carrying a stale push, the answer, and junk bytes.
        let burst = b"(add_iface(iface=usb0 addr=none mac=none gateway=none mask=none \
                      flag=00000000))(status(eth0,up))stray"
            .to_vec();
        let seed = b"(enumerate(iface=eth0 addr=none mac=none gateway=none mask=none \
                     flag=00000000))"
            .to_vec();
        let (handle, registry, log, _sent) = harness(vec![Ok(seed), Ok(burst)]);

        handle.exchange(Command::Enumerate).await.unwrap();
        let response =
            handle.exchange(Command::Status { iface: "eth0".into() }).await.unwrap();
        assert_eq!(response, Response::Status { iface: "eth0".into(), link: LinkState::Up });

        let registry = registry.lock().unwrap();
        assert_eq!(registry.names(), vec!["eth0", "usb0"]);
        assert_eq!(registry.get("eth0").unwrap().link, Some(LinkState::Up));
        drop(registry);

        let messages: Vec<_> = log.snapshot().into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m.contains("push: add_iface usb0")));
        assert!(messages.iter().any(|m| m.contains("unreadable message: stray")));
    }

    #[tokio::test]
    async fn answer_in_a_later_burst_still_settles() {
        let push = b"(add_route(iface=route0 addr=none mac=none gateway=10.0.0.1 \
                     mask=none flag=00000000))"
            .to_vec();
        let answer = b"(on(success(interface enabled)))".to_vec();
        let (handle, registry, _log, _sent) = harness(vec![Ok(push), Ok(answer)]);

        let response = handle.exchange(Command::On { iface: "eth0".into() }).await.unwrap();
        assert_eq!(response, Response::On("success(interface enabled)".into()));
        // The route push named no known interface, so nothing appeared.
        assert_eq!(registry.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn transport_loss_mid_exchange_propagates() {
        let lost = Err(Error::ConnectionLost(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        )));
        let (handle, _registry, _log, _sent) = harness(vec![lost]);

        let err = handle.exchange(Command::Enumerate).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn third_concurrent_exchange_is_refused_busy() {
        let slow = b"(status(eth0,up))".to_vec();
        let (mut fake, _sent) = FakeTransport::new(vec![
            Ok(slow.clone()),
            Ok(slow.clone()),
            Ok(slow),
        ]);
        fake.reply_delay = Some(Duration::from_millis(200));
        let registry = Arc::new(Mutex::new(InterfaceRegistry::default()));
        let (handle, _task) = spawn(
            fake,
            Profile::CURRENT,
            Budgets::default(),
            registry,
            EventLog::default(),
        );

        let status = Command::Status { iface: "eth0".into() };
        let first = {
            let handle = handle.clone();
            let command = status.clone();
            tokio::spawn(async move { handle.exchange(command).await })
        };
        // Let the worker pick up the first exchange, then fill the slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = {
            let handle = handle.clone();
            let command = status.clone();
            tokio::spawn(async move { handle.exchange(command).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = handle.exchange(status).await.unwrap_err();
        assert!(matches!(err, Error::Busy));

        // The queued exchanges still settle in order.
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn silence_times_out_with_the_measured_wait() {
        let (fake, _sent) = FakeTransport::new(vec![]);
        let registry = Arc::new(Mutex::new(InterfaceRegistry::default()));
        let budgets = Budgets { quick: Duration::from_millis(50), slow: Duration::from_secs(1) };
        let (handle, _task) =
            spawn(fake, Profile::CURRENT, budgets, registry, EventLog::default());

        let err = handle.exchange(Command::Enumerate).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
