//! Client library for the sdz network-configuration daemon.
//!
//! `ifctl` owns a persistent connection to the daemon's control socket,
//! encodes operator intents into its parenthesized text protocol,
//! decodes responses and unsolicited pushes, and keeps a local cache of
//! interface parameters. Exchanges run on a dispatcher task so callers
//! are never blocked on the wire; failures surface as status lines and
//! an event log instead of escalating.
//!
//! # Quick start
//!
//! ```no_run
//! use ifctl::{Session, SessionConfig};
//!
//! # async fn demo() -> ifctl::Result<()> {
//! let session = Session::new(SessionConfig::default());
//! session.initialize().await?;
//! for name in session.interfaces() {
//!     println!("{name}");
//! }
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod error;
mod events;
mod registry;
mod resolv;
mod session;
mod transport;

pub use dispatch::Budgets;
pub use error::{Error, Result};
pub use events::{SessionEvent, Severity};
pub use ifctl_proto::{Dialect, InterfaceRecord, LinkState, Mask, Profile};
pub use registry::InterfaceSnapshot;
pub use session::{Addressing, ApplyReport, Session, SessionConfig, StepOutcome};
pub use transport::ConnectionState;
