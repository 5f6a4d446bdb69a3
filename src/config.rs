//! burrow configuration
//!
//! One flat TOML file mirrors the CLI flags; flags win where both are
//! given. Everything is validated once at startup, and configuration
//! errors are the only fatal errors in the whole client.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::dns::RecordType;
use crate::tunnel::max_payload_len;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    53
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_retransmit_delay() -> Duration {
    Duration::from_secs(1)
}

/// Record type the tunnel rides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    A,
    Aaaa,
    Cname,
    Mx,
    #[default]
    Txt,
}

impl From<RecordKind> for RecordType {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::A => RecordType::A,
            RecordKind::Aaaa => RecordType::Aaaa,
            RecordKind::Cname => RecordType::Cname,
            RecordKind::Mx => RecordType::Mx,
            RecordKind::Txt => RecordType::Txt,
        }
    }
}

/// What the initial session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Bridge the local terminal.
    #[default]
    Console,
    /// Spawn a process and bridge its stdio.
    Exec,
    /// Open a command channel.
    Command,
    /// Send a liveness probe and exit.
    Ping,
}

/// Resolver and encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Recursive resolver to send queries to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Authoritative domain; without one, queries carry the wildcard
    /// prefix instead.
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub record_type: RecordKind,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            domain: None,
            record_type: RecordKind::default(),
        }
    }
}

/// Initial session settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSettings {
    #[serde(default)]
    pub kind: SessionKind,

    /// Command line for `exec` sessions.
    #[serde(default)]
    pub process: Option<String>,

    /// Friendly name reported to the server.
    #[serde(default)]
    pub name: Option<String>,
}

/// Timers for the polling loop and the reliability layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_retransmit_delay", with = "humantime_serde")]
    pub retransmit_delay: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            retransmit_delay: default_retransmit_delay(),
        }
    }
}

/// Main burrow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dns: DnsSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    /// Negotiate end-to-end encryption (on unless explicitly disabled).
    #[serde(default = "default_true")]
    pub encryption: bool,

    /// Preshared secret for authenticating the key exchange.
    #[serde(default)]
    pub preshared_secret: Option<String>,

    /// Print every packet in either direction.
    #[serde(default)]
    pub packet_trace: bool,

    /// Pin the initial sequence number (debugging).
    #[serde(default)]
    pub isn: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns: DnsSettings::default(),
            session: SessionSettings::default(),
            timing: TimingSettings::default(),
            encryption: true,
            preshared_secret: None,
            packet_trace: false,
            isn: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.dns.host.is_empty() {
            return Err("a DNS resolver host is required".to_string());
        }
        if self.dns.port == 0 {
            return Err("DNS port must be nonzero".to_string());
        }

        if let Some(domain) = &self.dns.domain {
            if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
                return Err(format!("invalid domain: {:?}", domain));
            }
            if domain.split('.').any(|label| label.is_empty() || label.len() > 63) {
                return Err(format!("invalid domain label in {:?}", domain));
            }
            let budget = max_payload_len(Some(domain));
            if budget < 16 {
                return Err(format!(
                    "domain {:?} is too long to leave room for tunnel payload",
                    domain
                ));
            }
            // The key exchange ships a 64-byte public key in one packet.
            if self.encryption && budget < 80 {
                return Err(format!(
                    "domain {:?} is too long for the key exchange; shorten it or disable encryption",
                    domain
                ));
            }
        }

        if let Some(name) = &self.session.name {
            if name.is_empty() || name.len() > 32 {
                return Err("session name must be 1-32 bytes".to_string());
            }
        }

        if self.session.kind == SessionKind::Exec && self.session.process.is_none() {
            return Err("exec sessions need a process command line".to_string());
        }
        if self.session.kind != SessionKind::Exec && self.session.process.is_some() {
            return Err("a process command line only makes sense with exec".to_string());
        }

        if self.preshared_secret.is_some() && !self.encryption {
            return Err("a preshared secret requires encryption to be enabled".to_string());
        }

        if self.timing.poll_interval.is_zero() {
            return Err("poll interval must be nonzero".to_string());
        }

        Ok(())
    }
}
