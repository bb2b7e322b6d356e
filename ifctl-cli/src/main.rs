//! Operator command line for the sdz network-configuration daemon.
//!
//! Every subcommand opens its own session: connect, enumerate, run the
//! requested exchanges, shut down. Results go to stdout; logs and failure
//! context go to stderr.

#![allow(clippy::print_stdout, clippy::print_stderr, clippy::missing_docs_in_private_items)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use ifctl::{
    Addressing, Budgets, Dialect, LinkState, Mask, Profile, Session, SessionConfig, Severity,
    StepOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ifctl",
    version,
    about = "Inspect and reconfigure interfaces through the sdz control daemon"
)]
struct Cli {
    /// Path of the daemon control socket.
    #[arg(long, global = true, default_value = ifctl_proto::CONTROL_SOCKET)]
    socket: PathBuf,

    /// Payload dialect the daemon speaks.
    #[arg(long, global = true, value_enum, default_value = "key-value")]
    dialect: DialectArg,

    /// Refresh addresses with getIP after every status poll
    /// (mid-generation daemons only).
    #[arg(long, global = true, overrides_with = "no_get_ip")]
    get_ip: bool,

    /// Negate an earlier --get-ip.
    #[arg(long, global = true, overrides_with = "get_ip")]
    no_get_ip: bool,

    /// Seconds to wait for a reply before giving up.
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the interfaces known to the daemon.
    #[command(visible_alias = "ls")]
    List {
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Refresh one interface and display it.
    Show {
        /// Interface name, e.g. `eth0`.
        iface: String,

        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Administratively enable an interface.
    Up {
        /// Interface name.
        iface: String,
    },

    /// Administratively disable an interface.
    Down {
        /// Interface name.
        iface: String,
    },

    /// Enable an interface and configure its addressing in one pass.
    Apply(ApplyArgs),

    /// Stop the DHCP client on an interface.
    DhcpOff {
        /// Interface name.
        iface: String,
    },

    /// Print the fallback DNS servers from resolv.conf.
    Dns {
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Shell to emit completions for.
        shell: Shell,
    },
}

#[derive(Args)]
#[command(group(clap::ArgGroup::new("addressing").required(true).args(["dhcp", "ip"])))]
struct ApplyArgs {
    /// Interface name.
    iface: String,

    /// Lease an address over DHCP.
    #[arg(long)]
    dhcp: bool,

    /// Static IPv4 address.
    #[arg(long, requires = "mask", requires = "gateway")]
    ip: Option<String>,

    /// Network mask, prefix length or dotted quad.
    #[arg(long, requires = "ip")]
    mask: Option<String>,

    /// Default gateway.
    #[arg(long, requires = "ip")]
    gateway: Option<String>,

    /// Leave the interface administratively down.
    #[arg(long)]
    disable: bool,
}

/// Wire dialect flag.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    /// Comma/colon-delimited positional payloads (first-generation daemons).
    Delimited,
    /// Space-separated key=value payloads.
    KeyValue,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Delimited => Self::Delimited,
            DialectArg::KeyValue => Self::KeyValue,
        }
    }
}

/// Output format selector.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    Table,
    /// Machine-readable JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    cli.init_tracing();
    if let Err(e) = cli.dispatch().await {
        eprintln!("ifctl: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn init_tracing(&self) {
        let filter = match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    fn session_config(&self) -> SessionConfig {
        let quick = Duration::from_secs(self.timeout);
        SessionConfig {
            socket: self.socket.clone(),
            profile: Profile {
                dialect: self.dialect.into(),
                supports_get_ip: self.get_ip && !self.no_get_ip,
            },
            budgets: Budgets {
                quick,
                slow: quick.max(Duration::from_secs(60)),
            },
            ..SessionConfig::default()
        }
    }

    async fn dispatch(self) -> Result<()> {
        let config = self.session_config();
        match self.command {
            Command::List { format } => list(config, format).await,
            Command::Show { iface, format } => show(config, &iface, format).await,
            Command::Up { iface } => toggle(config, &iface, true).await,
            Command::Down { iface } => toggle(config, &iface, false).await,
            Command::Apply(args) => apply(config, args).await,
            Command::DhcpOff { iface } => dhcp_off(config, &iface).await,
            Command::Dns { format } => dns(config, format).await,
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "ifctl", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}

/// Opens a session and runs the initial enumeration.
async fn connect(config: SessionConfig) -> Result<Session> {
    let session = Session::new(config);
    if let Err(e) = session.initialize().await {
        return fail(session, e).await;
    }
    Ok(session)
}

/// Prints the tail of the session event log to stderr, shuts the session
/// down, and converts the error.
async fn fail<T>(session: Session, err: ifctl::Error) -> Result<T> {
    let events = session.events();
    let start = events.len().saturating_sub(4);
    for event in &events[start..] {
        eprintln!("  {}: {}", severity_label(event.severity), event.message);
    }
    session.shutdown().await;
    Err(err.into())
}

const fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warn => "warn",
        Severity::Error => "error",
    }
}

async fn list(config: SessionConfig, format: OutputFormat) -> Result<()> {
    let session = connect(config).await?;
    let snapshots = session.snapshots();
    session.shutdown().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Table => {
            if snapshots.is_empty() {
                println!("No interfaces.");
                return Ok(());
            }
            println!(
                "{:<12} {:<6} {:<17} {:<16} {:<16} {}",
                "NAME", "LINK", "ADDRESS", "MASK", "GATEWAY", "MAC"
            );
            for snapshot in &snapshots {
                let record = &snapshot.record;
                println!(
                    "{:<12} {:<6} {:<17} {:<16} {:<16} {}",
                    record.name,
                    link_cell(snapshot.link),
                    or_dash(record.address.as_deref()),
                    mask_cell(record.mask.as_ref()),
                    or_dash(record.gateway.as_deref()),
                    or_dash(record.mac.as_deref()),
                );
            }
        }
    }
    Ok(())
}

async fn show(config: SessionConfig, iface: &str, format: OutputFormat) -> Result<()> {
    let session = connect(config).await?;
    let snapshot = match session.select_interface(iface).await {
        Ok(snapshot) => snapshot,
        Err(e) => return fail(session, e).await,
    };
    session.shutdown().await;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Table => {
            let record = &snapshot.record;
            println!("name:     {}", record.name);
            println!("link:     {}", link_cell(snapshot.link));
            println!("address:  {}", or_dash(record.address.as_deref()));
            println!("mask:     {}", mask_cell(record.mask.as_ref()));
            println!("gateway:  {}", or_dash(record.gateway.as_deref()));
            println!("mac:      {}", or_dash(record.mac.as_deref()));
            println!("flags:    {}", record.flags);
        }
    }
    Ok(())
}

async fn toggle(config: SessionConfig, iface: &str, enable: bool) -> Result<()> {
    let session = connect(config).await?;
    let outcome = match session.set_enabled(iface, enable).await {
        Ok(outcome) => outcome,
        Err(e) => return fail(session, e).await,
    };
    session.shutdown().await;
    report_step(&outcome)
}

async fn apply(config: SessionConfig, args: ApplyArgs) -> Result<()> {
    let addressing = if args.dhcp {
        Addressing::Dynamic
    } else {
        Addressing::Static {
            ip: args.ip.unwrap_or_default(),
            mask: args.mask.unwrap_or_default(),
            gateway: args.gateway.unwrap_or_default(),
        }
    };
    let session = connect(config).await?;
    let report = match session.apply_settings(&args.iface, !args.disable, addressing).await {
        Ok(report) => report,
        Err(e) => return fail(session, e).await,
    };
    session.shutdown().await;
    println!("{}: {}", report.toggle.command, report.toggle.detail);
    println!("{}: {}", report.addressing.command, report.addressing.detail);
    anyhow::ensure!(report.ok(), "apply did not complete");
    Ok(())
}

async fn dhcp_off(config: SessionConfig, iface: &str) -> Result<()> {
    let session = connect(config).await?;
    let outcome = match session.disable_dhcp(iface).await {
        Ok(outcome) => outcome,
        Err(e) => return fail(session, e).await,
    };
    session.shutdown().await;
    report_step(&outcome)
}

/// Reads resolv.conf through the session without touching the daemon.
async fn dns(config: SessionConfig, format: OutputFormat) -> Result<()> {
    let session = Session::new(config);
    let lookup = session.dns_servers();
    session.shutdown().await;
    let servers = lookup.context("cannot read the resolver configuration")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&servers)?),
        OutputFormat::Table => {
            if servers.is_empty() {
                println!("No fallback DNS servers.");
            }
            for server in &servers {
                println!("{server}");
            }
        }
    }
    Ok(())
}

fn report_step(outcome: &StepOutcome) -> Result<()> {
    println!("{}: {}", outcome.command, outcome.detail);
    anyhow::ensure!(outcome.ok, "{} was not acknowledged", outcome.command);
    Ok(())
}

fn link_cell(link: Option<LinkState>) -> &'static str {
    link.map_or("-", LinkState::as_str)
}

fn or_dash(field: Option<&str>) -> &str {
    match field {
        Some(s) if !s.is_empty() => s,
        _ => "-",
    }
}

fn mask_cell(mask: Option<&Mask>) -> String {
    mask.map_or_else(|| "-".to_owned(), Mask::to_string)
}
