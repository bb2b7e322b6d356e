//! Unix-socket transport with short-read framing.
//!
//! The daemon's wire format carries no length prefix or terminator, so
//! message completion is inferred from read behavior: accumulate until
//! the peer closes, a read returns fewer bytes than the buffer, or the
//! line goes idle with data in hand. [`ShortReadFraming`] names that
//! heuristic so a future daemon generation with real framing could swap
//! it out without touching callers. A read that fills the buffer
//! exactly is treated as probably complete once the idle grace passes,
//! never as an error.

use std::future::Future;
#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
#[cfg(unix)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tokio::time::{Instant, timeout};

#[cfg(unix)]
use crate::error::Error;
use crate::error::Result;

/// Lifecycle of the single daemon connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; the initial state and the result of `close()`.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Connected and usable.
    Ready,
    /// The connection failed mid-use; only an explicit reconnect repairs it.
    Faulted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
        })
    }
}

/// Shared, observe-only view of the transport's [`ConnectionState`].
///
/// The transport holds the writing side; sessions hand out clones so
/// callers can poll the state without touching the connection itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell {
    inner: Arc<Mutex<ConnectionState>>,
}

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        self.inner.lock().map(|s| *s).unwrap_or_default()
    }

    pub(crate) fn set(&self, next: ConnectionState) {
        if let Ok(mut s) = self.inner.lock() {
            *s = next;
        }
    }
}

/// Read-completion heuristic for the unframed wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShortReadFraming {
    /// Fixed receive buffer size. A read shorter than this ends the
    /// burst; a read that fills it keeps the loop going.
    pub(crate) read_chunk: usize,
    /// How long to wait for a follow-up chunk once data has arrived
    /// before declaring the burst complete.
    pub(crate) idle_grace: Duration,
}

impl Default for ShortReadFraming {
    fn default() -> Self {
        // The daemon reads and writes in 1 KiB chunks.
        Self { read_chunk: 1024, idle_grace: Duration::from_millis(150) }
    }
}

/// Connection-owning side of the client.
///
/// [`UnixTransport`] is the real implementation; tests substitute a
/// scripted in-memory one. Methods return `Send` futures so the
/// dispatcher worker can be spawned onto any runtime.
pub(crate) trait Transport {
    /// Connects to the endpoint, replacing any previous stream.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Writes `request` fully, then reads one burst within `budget`.
    fn send_receive(
        &mut self,
        request: &[u8],
        budget: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Reads one more burst, for exchanges still open after a burst
    /// that carried only unsolicited traffic.
    fn receive(&mut self, budget: Duration) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Drops the connection, if any.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Clones the shared state view.
    fn state_handle(&self) -> StateCell;
}

/// Transport over a Unix domain socket at a fixed path.
#[cfg(unix)]
#[derive(Debug)]
pub(crate) struct UnixTransport {
    path: PathBuf,
    framing: ShortReadFraming,
    stream: Option<UnixStream>,
    state: StateCell,
}

#[cfg(unix)]
impl UnixTransport {
    pub(crate) fn new(path: impl Into<PathBuf>, framing: ShortReadFraming) -> Self {
        Self { path: path.into(), framing, stream: None, state: StateCell::default() }
    }

    /// Drops the stream and marks the connection unusable.
    fn fault(&mut self) {
        self.stream = None;
        self.state.set(ConnectionState::Faulted);
    }

    async fn write_request(&mut self, request: &[u8]) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::ConnectionLost(io::Error::new(
                io::ErrorKind::NotConnected,
                "no connection to the daemon",
            )));
        };
        tracing::debug!(bytes = request.len(), "sending request");
        if let Err(e) = stream.write_all(request).await {
            self.fault();
            return Err(Error::ConnectionLost(e));
        }
        Ok(())
    }

    /// Accumulates one burst under the short-read heuristic.
    async fn read_burst(&mut self, budget: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + budget;
        let mut burst = Vec::new();
        let mut chunk = vec![0u8; self.framing.read_chunk];

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::ConnectionLost(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no connection to the daemon",
                )));
            };
            // Before any data arrives the whole budget applies; once
            // some has, the idle grace, capped by the deadline. Either
            // timer expiring with data in hand completes the burst.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait =
                if burst.is_empty() { remaining } else { self.framing.idle_grace.min(remaining) };

            match timeout(wait, stream.read(&mut chunk)).await {
                Err(_) if burst.is_empty() => {
                    self.fault();
                    return Err(Error::Timeout { elapsed: budget });
                }
                // Idle with data in hand: the burst is probably complete.
                Err(_) => return Ok(burst),
                Ok(Err(e)) => {
                    self.fault();
                    return Err(Error::ConnectionLost(e));
                }
                Ok(Ok(0)) if burst.is_empty() => {
                    self.fault();
                    return Err(Error::ConnectionLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "daemon closed the connection",
                    )));
                }
                // Peer closed after answering; hand the data up and
                // leave reconnecting to the caller.
                Ok(Ok(0)) => {
                    self.stream = None;
                    self.state.set(ConnectionState::Disconnected);
                    return Ok(burst);
                }
                Ok(Ok(n)) => {
                    burst.extend_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        // Short read: heuristic end of message.
                        return Ok(burst);
                    }
                    // Full buffer: more may follow within the grace.
                }
            }
        }
    }
}

#[cfg(unix)]
impl Transport for UnixTransport {
    async fn connect(&mut self) -> Result<()> {
        self.stream = None;
        self.state.set(ConnectionState::Connecting);
        match UnixStream::connect(&self.path).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state.set(ConnectionState::Ready);
                tracing::debug!(path = %self.path.display(), "connected");
                Ok(())
            }
            Err(source) => {
                self.state.set(ConnectionState::Disconnected);
                Err(Error::Unavailable { path: self.path.display().to_string(), source })
            }
        }
    }

    async fn send_receive(&mut self, request: &[u8], budget: Duration) -> Result<Vec<u8>> {
        self.write_request(request).await?;
        self.read_burst(budget).await
    }

    async fn receive(&mut self, budget: Duration) -> Result<Vec<u8>> {
        self.read_burst(budget).await
    }

    async fn close(&mut self) {
        self.stream = None;
        self.state.set(ConnectionState::Disconnected);
    }

    fn state_handle(&self) -> StateCell {
        self.state.clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use tokio::net::UnixListener;

    fn quick() -> ShortReadFraming {
        ShortReadFraming { read_chunk: 16, idle_grace: Duration::from_millis(50) }
    }

    #[tokio::test]
    async fn connect_to_missing_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = UnixTransport::new(dir.path().join("absent.sock"), quick());
        let err = t.connect().await.unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        assert_eq!(t.state_handle().get(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn short_read_completes_a_burst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = peer.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"(status(eth0))");
            peer.write_all(b"(status(eth0,up))").await.unwrap();
            // Hold the connection open so EOF is not the terminator.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut t = UnixTransport::new(&path, quick());
        t.connect().await.unwrap();
        assert_eq!(t.state_handle().get(), ConnectionState::Ready);
        let burst = t.send_receive(b"(status(eth0))", Duration::from_secs(1)).await.unwrap();
        assert_eq!(burst, b"(status(eth0,up))");
        assert_eq!(t.state_handle().get(), ConnectionState::Ready);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn exact_buffer_fill_is_probably_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = peer.read(&mut buf).await.unwrap();
            // Exactly one read buffer worth of bytes, then silence.
            peer.write_all(&[b'x'; 16]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut t = UnixTransport::new(&path, quick());
        t.connect().await.unwrap();
        let burst = t.send_receive(b"(enumerate())", Duration::from_secs(1)).await.unwrap();
        assert_eq!(burst.len(), 16);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn silence_for_the_whole_budget_is_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = peer.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
        });

        let mut t = UnixTransport::new(&path, quick());
        t.connect().await.unwrap();
        let err = t.send_receive(b"(enumerate())", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(t.state_handle().get(), ConnectionState::Faulted);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_without_data_is_connection_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = peer.read(&mut buf).await.unwrap();
            // Drop without answering.
        });

        let mut t = UnixTransport::new(&path, quick());
        t.connect().await.unwrap();
        let err = t.send_receive(b"(enumerate())", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(t.state_handle().get(), ConnectionState::Faulted);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut t = UnixTransport::new(&path, quick());
        t.connect().await.unwrap();
        t.close().await;
        assert_eq!(t.state_handle().get(), ConnectionState::Disconnected);
        let err = t.send_receive(b"(enumerate())", Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }
}
