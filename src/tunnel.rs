//! DNS tunnel driver
//!
//! Carries packet bytes through a recursive resolver: outbound data is
//! hex-encoded into the labels of a question name, inbound data comes
//! back in the answer records. One UDP socket, one query in flight, and a
//! coarse polling timer that doubles as the retransmission driver.
//!
//! ```text
//! session bytes → controller → [hex labels].domain → resolver → server
//! server → answer record(s) → reassembly → controller → session bytes
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::MissedTickBehavior;

use crate::controller::Controller;
use crate::dns::{Message, RData, Rcode, RecordType};
use crate::encoding::hex_decode_name;

/// Fixed first label used when no domain is configured, so the server can
/// match the query without owning a zone.
pub const WILDCARD_PREFIX: &str = "dnscat";

/// Hard ceiling on a DNS name.
const MAX_DNS_LENGTH: usize = 255;

/// Leave one byte of headroom under the 63-byte label limit.
const MAX_FIELD_LENGTH: usize = 62;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("could not resolve {0}")]
    NoSuchHost(String),

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("domain {0:?} leaves no room for payload in a DNS name")]
    DomainTooLong(String),
}

/// The per-query payload budget: the name must stay under 255 bytes after
/// hex expansion, label dots and the domain suffix (or wildcard prefix).
pub fn max_payload_len(domain: Option<&str>) -> usize {
    let tag_len = domain.map_or(WILDCARD_PREFIX.len(), str::len);
    (MAX_DNS_LENGTH / 2)
        .saturating_sub(tag_len)
        .saturating_sub(1)
        .saturating_sub(MAX_DNS_LENGTH / MAX_FIELD_LENGTH + 1)
}

/// Hex-encode a payload into a question name, splitting labels before
/// they hit the length limit.
pub fn encode_name(payload: &[u8], domain: Option<&str>) -> String {
    let mut name = String::with_capacity(MAX_DNS_LENGTH);

    if domain.is_none() {
        name.push_str(WILDCARD_PREFIX);
        name.push('.');
    }

    let mut section_length = 0;
    for (index, byte) in payload.iter().enumerate() {
        name.push_str(&format!("{:02x}", byte));
        section_length += 2;
        if index + 1 != payload.len() && section_length + 2 >= MAX_FIELD_LENGTH {
            section_length = 0;
            name.push('.');
        }
    }

    if let Some(domain) = domain {
        name.push('.');
        name.push_str(domain);
    }

    name
}

/// Strip the domain suffix (or the wildcard prefix) off an answer name,
/// leaving only hex payload and dots.
fn strip_domain(name: &str, domain: Option<&str>) -> Option<String> {
    match domain {
        Some(domain) => {
            if name.len() <= domain.len() {
                log::warn!("answer name {:?} is too short to carry the domain", name);
                return None;
            }
            let (head, tail) = name.split_at(name.len() - domain.len() - 1);
            if !tail.starts_with('.') || !tail[1..].eq_ignore_ascii_case(domain) {
                log::warn!("answer name {:?} does not end in the domain", name);
                return None;
            }
            Some(head.to_string())
        }
        None => {
            if name.len() < WILDCARD_PREFIX.len()
                || !name[..WILDCARD_PREFIX.len()].eq_ignore_ascii_case(WILDCARD_PREFIX)
            {
                log::warn!("answer name {:?} lacks the wildcard prefix", name);
                return None;
            }
            let rest = &name[WILDCARD_PREFIX.len()..];
            Some(rest.trim_start_matches('.').to_string())
        }
    }
}

fn decode_hex_answer(text: &str, what: &str) -> Option<Vec<u8>> {
    match hex_decode_name(text) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("could not decode {} answer: {}", what, e);
            None
        }
    }
}

/// Reassemble A/AAAA answers: sort by the leading tag byte, concatenate
/// the tails, then read the one-byte payload length off the front.
fn reassemble_tagged<const N: usize>(chunks: Vec<[u8; N]>) -> Option<Vec<u8>> {
    let mut chunks = chunks;
    chunks.sort_by_key(|chunk| chunk[0]);

    let mut joined = Vec::with_capacity(chunks.len() * (N - 1));
    for chunk in &chunks {
        joined.extend_from_slice(&chunk[1..]);
    }

    let length = *joined.first()? as usize;
    if length > joined.len() - 1 {
        log::warn!(
            "address answers claim {} payload bytes but carry {}",
            length,
            joined.len() - 1
        );
        return None;
    }
    Some(joined[1..1 + length].to_vec())
}

/// Configuration for the tunnel driver, already validated.
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub host: String,
    pub port: u16,
    pub domain: Option<String>,
    pub record_type: RecordType,
    pub poll_interval: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 53,
            domain: None,
            record_type: RecordType::Txt,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

pub struct DnsTunnel {
    socket: UdpSocket,
    domain: Option<String>,
    record_type: RecordType,
    poll_interval: Duration,
}

impl DnsTunnel {
    /// Bind a UDP socket and point it at the resolver.
    pub async fn connect(settings: TunnelSettings) -> Result<Self, TunnelError> {
        if max_payload_len(settings.domain.as_deref()) < 16 {
            return Err(TunnelError::DomainTooLong(
                settings.domain.unwrap_or_default(),
            ));
        }

        let target = format!("{}:{}", settings.host, settings.port);
        let resolver: SocketAddr = lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| TunnelError::NoSuchHost(target.clone()))?;

        let local = if resolver.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(resolver).await?;

        log::info!(
            "DNS tunnel ready: resolver {}, domain {:?}, record type {:?}",
            resolver,
            settings.domain,
            settings.record_type
        );

        Ok(Self {
            socket,
            domain: settings.domain,
            record_type: settings.record_type,
            poll_interval: settings.poll_interval,
        })
    }

    /// Per-query payload budget for this tunnel's domain.
    pub fn max_payload(&self) -> usize {
        max_payload_len(self.domain.as_deref())
    }

    /// Drive the tunnel until every session has closed.
    ///
    /// Single-threaded and cooperative: the loop alternates between the
    /// polling timer (which asks the controller for outgoing data) and
    /// socket readability (which feeds answers back in).
    pub async fn run(&mut self, controller: &mut Controller) -> Result<(), TunnelError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 65535];

        loop {
            controller.reap();
            if controller.is_finished() {
                log::info!("all sessions are closed, tunnel is done");
                return Ok(());
            }

            tokio::select! {
                _ = interval.tick() => {
                    controller.pump_drivers().await;
                    self.poll_once(controller).await;
                }
                received = self.socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        if self.handle_reply(&buf[..len], controller).await {
                            // The session advanced; answer right away
                            // instead of waiting out the timer.
                            self.poll_once(controller).await;
                        }
                    }
                    Err(e) => {
                        log::error!("DNS socket receive failed: {}", e);
                    }
                },
            }
        }
    }

    /// Ask the controller for one packet and ship it as a query.
    async fn poll_once(&self, controller: &mut Controller) {
        let Some(payload) = controller.outgoing(self.max_payload()) else {
            return;
        };

        if let Err(e) = self.send_query(&payload).await {
            log::warn!("could not send DNS query: {}", e);
        }
    }

    async fn send_query(&self, payload: &[u8]) -> Result<(), TunnelError> {
        let name = encode_name(payload, self.domain.as_deref());
        let query = Message::query(rand::random::<u16>(), name.clone(), self.record_type);

        let bytes = query.to_bytes().map_err(|e| {
            log::error!("could not build query for {:?}: {}", name, e);
            TunnelError::Socket(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ))
        })?;

        log::debug!("sending {} payload bytes as {:?}", payload.len(), name);
        self.socket.send(&bytes).await?;
        Ok(())
    }

    /// Parse a resolver reply and feed the reassembled payload to the
    /// controller. Returns true when a session wants an immediate poll.
    async fn handle_reply(&self, data: &[u8], controller: &mut Controller) -> bool {
        let message = match Message::parse(data) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("dropping undecodable DNS reply: {}", e);
                return false;
            }
        };

        let Some(payload) = decode_answers(&message, self.domain.as_deref()) else {
            return false;
        };
        if payload.is_empty() {
            return false;
        }

        log::debug!("tunnel delivered {} payload bytes", payload.len());
        controller.incoming(&payload).await
    }
}

/// Pull the tunnel payload out of a reply: the answer record(s) carry hex
/// in names or text, or length-prefixed bytes spread across addresses.
pub fn decode_answers(message: &Message, domain: Option<&str>) -> Option<Vec<u8>> {
    if message.rcode != Rcode::Success {
        // The retransmission timer re-sends the same query.
        log::warn!("DNS error in reply: {:?}", message.rcode);
        return None;
    }
    if message.questions.len() != 1 {
        log::warn!(
            "DNS reply carries {} questions, expected 1",
            message.questions.len()
        );
        return None;
    }
    if message.answers.is_empty() {
        log::warn!("DNS reply carries no answers");
        return None;
    }

    match &message.answers[0].rdata {
        RData::Txt(text) => {
            let text = std::str::from_utf8(text)
                .map_err(|_| log::warn!("TXT answer is not ASCII hex"))
                .ok()?;
            decode_hex_answer(text, "TXT")
        }
        RData::Cname(target) => {
            let stripped = strip_domain(target, domain)?;
            decode_hex_answer(&stripped, "CNAME")
        }
        RData::Mx { exchange, .. } => {
            let stripped = strip_domain(exchange, domain)?;
            decode_hex_answer(&stripped, "MX")
        }
        RData::A(_) => {
            let chunks: Vec<[u8; 4]> = message
                .answers
                .iter()
                .filter_map(|record| match &record.rdata {
                    RData::A(addr) => Some(addr.octets()),
                    _ => None,
                })
                .collect();
            reassemble_tagged(chunks)
        }
        RData::Aaaa(_) => {
            let chunks: Vec<[u8; 16]> = message
                .answers
                .iter()
                .filter_map(|record| match &record.rdata {
                    RData::Aaaa(addr) => Some(addr.octets()),
                    _ => None,
                })
                .collect();
            reassemble_tagged(chunks)
        }
        other => {
            log::warn!("unsupported answer type {:?}", other.rtype());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn name_round_trips_with_domain() {
        let payload = [0x00, 0x01, 0x02, 0xff];
        let name = encode_name(&payload, Some("example.com"));
        assert_eq!(name, "000102ff.example.com");

        let stripped = strip_domain(&name, Some("example.com")).unwrap();
        assert_eq!(hex_decode_name(&stripped).unwrap(), payload);
    }

    #[test]
    fn name_round_trips_with_wildcard_prefix() {
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let name = encode_name(&payload, None);
        assert_eq!(name, "dnscat.deadbeef");

        let stripped = strip_domain(&name, None).unwrap();
        assert_eq!(hex_decode_name(&stripped).unwrap(), payload);
    }

    #[test]
    fn full_payload_fits_dns_limits() {
        let domain = "example.com";
        let budget = max_payload_len(Some(domain));
        let payload = vec![0xaa; budget];

        let name = encode_name(&payload, Some(domain));
        assert!(name.len() <= MAX_DNS_LENGTH, "name is {} bytes", name.len());
        for label in name.split('.') {
            assert!(label.len() <= 63, "label is {} bytes", label.len());
        }

        let stripped = strip_domain(&name, Some(domain)).unwrap();
        assert_eq!(hex_decode_name(&stripped).unwrap(), payload);
    }

    #[test]
    fn long_payload_splits_labels() {
        let payload = vec![0x41; 100];
        let name = encode_name(&payload, None);
        assert!(name.split('.').all(|label| label.len() <= 63));
        let stripped = strip_domain(&name, None).unwrap();
        assert_eq!(hex_decode_name(&stripped).unwrap(), payload);
    }

    #[test]
    fn domain_strip_is_case_insensitive() {
        let stripped = strip_domain("00ff.EXAMPLE.COM", Some("example.com")).unwrap();
        assert_eq!(stripped, "00ff");
    }

    #[test]
    fn foreign_answer_names_are_rejected() {
        assert!(strip_domain("00ff.evil.com", Some("example.com")).is_none());
        assert!(strip_domain("short", Some("example.com")).is_none());
        assert!(strip_domain("nothex.zzz", None).is_none());
    }

    #[test]
    fn a_record_reassembly() {
        let addrs = [
            Ipv4Addr::new(10, 1, 2, 3),
            Ipv4Addr::new(20, 4, 5, 6),
            Ipv4Addr::new(30, 7, 8, 9),
        ];
        let chunks: Vec<[u8; 4]> = addrs.iter().map(|a| a.octets()).collect();
        // First tail byte is the length prefix: one payload byte.
        assert_eq!(reassemble_tagged(chunks).unwrap(), vec![0x02]);
    }

    #[test]
    fn a_record_reassembly_sorts_by_tag() {
        // Same answers, shuffled; the tag byte restores the order.
        let chunks = vec![
            [30u8, 7, 8, 9],
            [10, 1, 2, 3],
            [20, 4, 5, 6],
        ];
        assert_eq!(reassemble_tagged(chunks).unwrap(), vec![0x02]);
    }

    #[test]
    fn reassembly_rejects_overlong_length() {
        // Claims 200 payload bytes; only 2 follow.
        let chunks = vec![[0u8, 200, 9, 9]];
        assert!(reassemble_tagged(chunks).is_none());
    }

    #[test]
    fn aaaa_record_reassembly() {
        let mut first = [0u8; 16];
        first[0] = 1; // tag
        first[1] = 20; // payload length
        for (i, byte) in first.iter_mut().enumerate().skip(2) {
            *byte = i as u8;
        }
        let mut second = [0u8; 16];
        second[0] = 2;
        for (i, byte) in second.iter_mut().enumerate().skip(1) {
            *byte = 0x40 + i as u8;
        }

        let payload = reassemble_tagged(vec![second, first]).unwrap();
        assert_eq!(payload.len(), 20);
        assert_eq!(payload[0], first[2]);
        assert_eq!(payload[14], second[1]);
    }

    #[test]
    fn payload_budget_matches_the_wire_math() {
        // 127 - len(domain) - 1 - 5 for a domain, wildcard length otherwise.
        assert_eq!(max_payload_len(Some("example.com")), 110);
        assert_eq!(max_payload_len(None), 115);
    }
}
