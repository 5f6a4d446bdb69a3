//! burrow - covert DNS tunnel transport client
//!
//! Opens a session to a burrow server by way of a recursive resolver and
//! bridges it to the terminal, a spawned process, or a liveness probe.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use burrow::config::{Config, RecordKind, SessionKind};
use burrow::controller::Controller;
use burrow::drivers::{ConsoleDriver, ExecDriver, PingDriver, SessionDriver};
use burrow::session::{Session, SessionParams};
use burrow::tunnel::{DnsTunnel, TunnelSettings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to keep flushing FINs after the operator hits ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "burrow")]
#[command(version = VERSION)]
#[command(about = "Covert DNS tunnel transport client", long_about = None)]
struct Cli {
    /// Configuration file path (TOML); flags override file values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Recursive DNS resolver to send queries to
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Resolver UDP port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Authoritative domain for the tunnel (omit to use the wildcard prefix)
    #[arg(short, long, value_name = "DOMAIN")]
    domain: Option<String>,

    /// Record type to tunnel over
    #[arg(long, value_enum, value_name = "TYPE")]
    record_type: Option<RecordKind>,

    /// Preshared secret for authenticating the key exchange
    #[arg(long, value_name = "SECRET")]
    secret: Option<String>,

    /// Disable the end-to-end encryption layer entirely
    #[arg(long)]
    no_encryption: bool,

    /// Bridge the local terminal (the default)
    #[arg(long, conflicts_with_all = ["exec", "command", "ping"])]
    console: bool,

    /// Spawn a process and bridge its stdin/stdout
    #[arg(long, value_name = "CMD", conflicts_with_all = ["command", "ping"])]
    exec: Option<String>,

    /// Open a command channel session
    #[arg(long, conflicts_with = "ping")]
    command: bool,

    /// Send a liveness probe and exit
    #[arg(long)]
    ping: bool,

    /// Friendly session name reported to the server
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Print every packet in either direction
    #[arg(long)]
    packet_trace: bool,

    /// Pin the initial sequence number (dangerous, debugging only)
    #[arg(long, value_name = "ISN")]
    isn: Option<u16>,

    /// Polling interval, e.g. "100ms"
    #[arg(long, value_name = "DURATION")]
    poll_interval: Option<humantime::Duration>,

    /// Retransmission delay, e.g. "1s"
    #[arg(long, value_name = "DURATION")]
    retransmit_delay: Option<humantime::Duration>,
}

impl Cli {
    /// Merge CLI flags over the file configuration.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("could not load {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.dns.host = host;
        }
        if let Some(port) = self.port {
            config.dns.port = port;
        }
        if let Some(domain) = self.domain {
            config.dns.domain = Some(domain);
        }
        if let Some(record_type) = self.record_type {
            config.dns.record_type = record_type;
        }
        if let Some(secret) = self.secret {
            config.preshared_secret = Some(secret);
        }
        if self.no_encryption {
            config.encryption = false;
            config.preshared_secret = None;
        }

        if self.ping {
            config.session.kind = SessionKind::Ping;
        } else if self.command {
            config.session.kind = SessionKind::Command;
        } else if let Some(process) = self.exec {
            config.session.kind = SessionKind::Exec;
            config.session.process = Some(process);
        } else if self.console {
            config.session.kind = SessionKind::Console;
        }

        if let Some(name) = self.name {
            config.session.name = Some(name);
        }
        if self.packet_trace {
            config.packet_trace = true;
        }
        if let Some(isn) = self.isn {
            config.isn = Some(isn);
        }
        if let Some(interval) = self.poll_interval {
            config.timing.poll_interval = interval.into();
        }
        if let Some(delay) = self.retransmit_delay {
            config.timing.retransmit_delay = delay.into();
        }

        Ok(config)
    }
}

fn build_driver(config: &Config) -> Result<Box<dyn SessionDriver>> {
    match config.session.kind {
        SessionKind::Console | SessionKind::Command => Ok(Box::new(ConsoleDriver::new())),
        SessionKind::Ping => Ok(Box::new(PingDriver::new())),
        SessionKind::Exec => {
            let Some(process) = &config.session.process else {
                bail!("exec sessions need a process command line");
            };
            let driver = ExecDriver::spawn(process)
                .with_context(|| format!("could not spawn {:?}", process))?;
            Ok(Box::new(driver))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.into_config()?;
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {}", e);
    }

    info!("burrow {} starting", VERSION);
    info!(
        "resolver {}:{}, domain {}, record type {:?}",
        config.dns.host,
        config.dns.port,
        config.dns.domain.as_deref().unwrap_or("(wildcard prefix)"),
        config.dns.record_type
    );
    if config.isn.is_some() {
        warn!("a pinned ISN makes sequence numbers predictable; use for debugging only");
    }

    let driver = build_driver(&config)?;
    let session = Session::new(
        driver,
        SessionParams {
            name: config.session.name.clone(),
            is_command: config.session.kind == SessionKind::Command,
            is_ping: config.session.kind == SessionKind::Ping,
            encryption: config.encryption,
            preshared: config.preshared_secret.clone(),
            isn: config.isn,
            packet_trace: config.packet_trace,
            retransmit_delay: Some(config.timing.retransmit_delay),
        },
    );

    let mut controller = Controller::new();
    controller.add_session(session);

    let mut tunnel = DnsTunnel::connect(TunnelSettings {
        host: config.dns.host.clone(),
        port: config.dns.port,
        domain: config.dns.domain.clone(),
        record_type: config.dns.record_type.into(),
        poll_interval: config.timing.poll_interval,
    })
    .await
    .context("could not set up the DNS tunnel")?;

    tokio::select! {
        result = tunnel.run(&mut controller) => {
            result.context("tunnel failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing sessions");
            controller.shutdown_all("Client exiting");
            if tokio::time::timeout(SHUTDOWN_GRACE, tunnel.run(&mut controller))
                .await
                .is_err()
            {
                warn!("shutdown grace period expired with sessions still open");
            }
        }
    }

    info!("done");
    Ok(())
}
