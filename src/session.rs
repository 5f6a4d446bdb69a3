//! Session state machine
//!
//! A session is one logical byte stream multiplexed over the tunnel. It
//! owns the sequence/acknowledgement window, the retransmission timer and
//! the optional encryption handshake, and pumps bytes between its local
//! I/O driver and the packet layer.
//!
//! The send side keeps unacknowledged bytes in the outgoing buffer and
//! caches the serialised form of the last window, so a retransmission is
//! bitwise identical to the original transmission (same packet id, same
//! nonce when encrypted). The cache is invalidated the moment sequence
//! state or the buffer changes.

use std::time::Duration;

use tokio::time::Instant;

use crate::buffer::ByteBuffer;
use crate::crypto::{Encryptor, Role, ENCRYPTION_OVERHEAD};
use crate::drivers::SessionDriver;
use crate::packet::{
    options, peek_kind, EncBody, Packet, PacketBody, PacketKind, HEADER_LEN, MSG_OVERHEAD,
};

/// How long to wait for a reply before re-sending the current window.
pub const RETRANSMIT_DELAY: Duration = Duration::from_secs(1);

/// Stop pulling from the driver once this much is buffered unacked.
const MAX_BUFFERED: usize = 0x8000;

/// Per-pull chunk when draining a driver.
const DRIVER_CHUNK: usize = 2048;

/// Wire overhead of a PING packet around its data: header + ping_id + NUL.
const PING_OVERHEAD: usize = HEADER_LEN + 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    EncryptedNew,
    EncryptedAuthed,
    Established,
    Shutdown,
}

/// Construction-time knobs, normally filled in from the configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// Friendly name carried in the SYN (sets the NAME option bit).
    pub name: Option<String>,
    /// Request a command channel (sets the COMMAND option bit).
    pub is_command: bool,
    /// Liveness probe: speak PING instead of opening a stream.
    pub is_ping: bool,
    /// Negotiate end-to-end encryption after the SYN exchange.
    pub encryption: bool,
    /// Preshared secret for authenticating the key exchange.
    pub preshared: Option<String>,
    /// Pin the initial sequence number instead of picking one at random.
    pub isn: Option<u16>,
    /// Print a one-line render of every packet in either direction.
    pub packet_trace: bool,
    /// Override the retransmission delay (tests mostly).
    pub retransmit_delay: Option<Duration>,
}

pub struct Session {
    id: u16,
    state: SessionState,
    my_seq: u16,
    their_seq: u16,
    my_options: u16,
    peer_options: u16,
    name: Option<String>,
    is_ping: bool,

    driver: Box<dyn SessionDriver>,
    driver_closed: bool,
    outgoing: ByteBuffer,
    /// Local close requested; finish sending, then FIN.
    draining: bool,
    fin_sent: bool,

    encryption: bool,
    preshared: Option<String>,
    encryptor: Option<Encryptor>,

    retransmit_delay: Duration,
    next_transmit: Instant,
    /// Serialised bytes of the in-flight packet, for bitwise retransmit.
    cached_window: Option<Vec<u8>>,

    packet_trace: bool,
}

impl Session {
    pub fn new(driver: Box<dyn SessionDriver>, params: SessionParams) -> Self {
        let id = rand::random::<u16>();
        let my_seq = params.isn.unwrap_or_else(rand::random::<u16>);

        let mut my_options = 0;
        if params.name.is_some() {
            my_options |= options::NAME;
        }
        if params.is_command {
            my_options |= options::COMMAND;
        }

        // Probes never negotiate keys; there is no stream to protect.
        let encryption = params.encryption && !params.is_ping;

        log::debug!(
            "creating session 0x{:04x} (isn=0x{:04x}, options=0x{:04x}, ping={})",
            id,
            my_seq,
            my_options,
            params.is_ping
        );

        Self {
            id,
            state: SessionState::New,
            my_seq,
            their_seq: 0,
            my_options,
            peer_options: 0,
            name: params.name,
            is_ping: params.is_ping,
            driver,
            driver_closed: false,
            outgoing: ByteBuffer::new(),
            draining: false,
            fin_sent: false,
            encryption,
            preshared: params.preshared,
            encryptor: None,
            retransmit_delay: params.retransmit_delay.unwrap_or(RETRANSMIT_DELAY),
            next_transmit: Instant::now(),
            cached_window: None,
            packet_trace: params.packet_trace,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Option bits the peer announced in its SYN.
    pub fn peer_options(&self) -> u16 {
        self.peer_options
    }

    pub fn is_shutdown(&self) -> bool {
        self.state == SessionState::Shutdown
    }

    /// A session can be dropped from the controller once it has FIN'd and
    /// has nothing left to send.
    pub fn is_removable(&self) -> bool {
        self.state == SessionState::Shutdown && self.fin_sent && self.outgoing.is_empty()
    }

    fn trace(&self, direction: &str, packet: &Packet) {
        if self.packet_trace {
            eprintln!("{}: {}", direction, packet);
        }
    }

    /// Allow an immediate transmit; called when fresh data was ACKed or
    /// the handshake advanced.
    fn reset_transmit(&mut self) {
        self.next_transmit = Instant::now();
        self.cached_window = None;
    }

    /// Arm the retransmission timer after sending a window.
    fn hold_transmit(&mut self) {
        self.next_transmit = Instant::now() + self.retransmit_delay;
    }

    fn enter_shutdown(&mut self, reply_with_fin: bool) {
        self.state = SessionState::Shutdown;
        self.outgoing.clear();
        self.cached_window = None;
        // A peer that FIN'd us is gone; nothing to say back.
        self.fin_sent = !reply_with_fin;
    }

    /// Move bytes from the driver into the outgoing buffer and close the
    /// driver once the session is torn down.
    pub async fn pump_driver(&mut self) {
        if self.state == SessionState::Shutdown {
            if !self.driver_closed {
                self.driver.close().await;
                self.driver_closed = true;
            }
            return;
        }

        // Ping probes hand their payload to get_outgoing directly.
        if self.is_ping {
            return;
        }

        if !self.draining {
            while self.outgoing.len() < MAX_BUFFERED {
                let room = (MAX_BUFFERED - self.outgoing.len()).min(DRIVER_CHUNK);
                match self.driver.get_outgoing(room) {
                    Some(chunk) if !chunk.is_empty() => self.outgoing.add_bytes(&chunk),
                    _ => break,
                }
            }

            if self.driver.is_shutdown() {
                log::debug!(
                    "session 0x{:04x}: local driver finished, draining {} buffered bytes",
                    self.id,
                    self.outgoing.len()
                );
                self.draining = true;
            }
        }
    }

    /// Serialise, optionally encrypt, cache and arm the timer.
    fn transmit(&mut self, packet: &Packet) -> Option<Vec<u8>> {
        self.trace("OUT", packet);

        let mut bytes = packet.to_bytes();
        if !matches!(packet.body, PacketBody::Enc { .. }) {
            if let Some(encryptor) = self.encryptor.as_mut() {
                if encryptor.is_ready() {
                    match encryptor.encrypt_packet(&bytes) {
                        Ok(frame) => bytes = frame,
                        Err(e) => {
                            log::warn!("session 0x{:04x}: encryption failed: {}", self.id, e);
                            return None;
                        }
                    }
                }
            }
        }

        self.cached_window = Some(bytes.clone());
        self.hold_transmit();
        Some(bytes)
    }

    /// The next packet to put on the wire, at most `max` bytes, or `None`
    /// if the retransmission timer is still running.
    pub fn get_outgoing(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.state == SessionState::Shutdown {
            if self.fin_sent {
                return None;
            }
            self.fin_sent = true;
            let packet = Packet::fin(self.id, "Session closed");
            self.trace("OUT", &packet);
            let mut bytes = packet.to_bytes();
            if let Some(encryptor) = self.encryptor.as_mut() {
                if encryptor.is_ready() {
                    if let Ok(frame) = encryptor.encrypt_packet(&bytes) {
                        bytes = frame;
                    }
                }
            }
            return Some(bytes);
        }

        if Instant::now() < self.next_transmit {
            return None;
        }

        // Retransmission: replay the exact bytes of the in-flight window.
        if let Some(cached) = self.cached_window.clone() {
            log::debug!(
                "session 0x{:04x}: retransmitting {} bytes",
                self.id,
                cached.len()
            );
            self.hold_transmit();
            return Some(cached);
        }

        match self.state {
            SessionState::New if self.is_ping => {
                let budget = max.checked_sub(PING_OVERHEAD)?;
                let data = self.driver.get_outgoing(budget)?;
                let data = String::from_utf8_lossy(&data).into_owned();
                let packet = Packet::ping(self.id, self.id, data);
                self.transmit(&packet)
            }
            SessionState::New => {
                let packet = Packet::syn(self.id, self.my_seq, self.my_options, self.name.clone());
                self.transmit(&packet)
            }
            SessionState::EncryptedNew => {
                let public_key = self.encryptor.as_ref()?.public_key();
                let packet = Packet::enc_init(self.id, public_key);
                self.transmit(&packet)
            }
            SessionState::EncryptedAuthed => {
                let authenticator = match self.encryptor.as_ref()?.my_authenticator() {
                    Ok(auth) => auth,
                    Err(e) => {
                        log::warn!("session 0x{:04x}: no authenticator: {}", self.id, e);
                        return None;
                    }
                };
                let packet = Packet::enc_auth(self.id, authenticator);
                self.transmit(&packet)
            }
            SessionState::Established => {
                if self.draining && self.outgoing.is_empty() {
                    log::info!("session 0x{:04x} drained, closing", self.id);
                    self.enter_shutdown(true);
                    return self.get_outgoing(max);
                }

                // Burn a new key epoch before the nonce space runs out.
                if self
                    .encryptor
                    .as_ref()
                    .is_some_and(|e| e.should_renegotiate())
                {
                    log::info!("session 0x{:04x}: renegotiating encryption keys", self.id);
                    self.encryptor =
                        Some(Encryptor::new(Role::Client, self.preshared.clone()));
                    self.state = SessionState::EncryptedNew;
                    return self.get_outgoing(max);
                }

                let mut overhead = MSG_OVERHEAD;
                if self.encryptor.as_ref().is_some_and(|e| e.is_ready()) {
                    overhead += ENCRYPTION_OVERHEAD;
                }
                let budget = max.checked_sub(overhead)?;
                let take = budget.min(self.outgoing.len());
                let data = self.outgoing.peek_remaining()[..take].to_vec();

                let packet = Packet::msg(self.id, self.my_seq, self.their_seq, data);
                self.transmit(&packet)
            }
            SessionState::Shutdown => unreachable!("handled above"),
        }
    }

    /// Feed one raw packet (possibly an encrypted frame) into the state
    /// machine. Returns true when the caller should poll for outgoing data
    /// right away instead of waiting for the next tick.
    pub async fn handle_incoming(&mut self, data: &[u8]) -> bool {
        let kind = match peek_kind(data) {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("session 0x{:04x}: unreadable packet: {}", self.id, e);
                return false;
            }
        };

        // Everything but the ENC handshake itself arrives encrypted once
        // keys are up. Verify before parsing; failures are silent drops.
        let plain;
        let packet_bytes: &[u8] = match (&self.encryptor, kind) {
            (Some(encryptor), k) if encryptor.is_ready() && k != PacketKind::Enc => {
                match encryptor.decrypt_packet(data) {
                    Ok((_nonce, bytes)) => {
                        plain = bytes;
                        &plain
                    }
                    Err(e) => {
                        log::warn!("session 0x{:04x}: dropping frame: {}", self.id, e);
                        return false;
                    }
                }
            }
            _ => data,
        };

        let packet = match Packet::parse(packet_bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("session 0x{:04x}: dropping packet: {}", self.id, e);
                return false;
            }
        };
        self.trace("IN", &packet);

        match self.state {
            SessionState::New => self.handle_in_new(packet).await,
            SessionState::EncryptedNew => self.handle_in_encrypted_new(packet),
            SessionState::EncryptedAuthed => self.handle_in_encrypted_authed(packet),
            SessionState::Established => self.handle_in_established(packet).await,
            SessionState::Shutdown => {
                // Duplicate FINs (and stragglers) are ignored.
                log::debug!(
                    "session 0x{:04x}: ignoring {} packet after shutdown",
                    self.id,
                    packet
                );
                false
            }
        }
    }

    async fn handle_in_new(&mut self, packet: Packet) -> bool {
        match packet.body {
            PacketBody::Ping { ping_id, ref data } if self.is_ping => {
                if ping_id != self.id {
                    log::warn!(
                        "ping reply has wrong id (0x{:04x}, expected 0x{:04x})",
                        ping_id,
                        self.id
                    );
                    return false;
                }
                self.driver.data_received(data.as_bytes()).await;
                if self.driver.is_shutdown() {
                    self.enter_shutdown(false);
                }
                false
            }
            PacketBody::Syn { seq, options, ref name } => {
                log::info!(
                    "session 0x{:04x} got peer SYN (isn=0x{:04x}, options=0x{:04x})",
                    self.id,
                    seq,
                    options
                );
                if let Some(name) = name {
                    log::debug!("peer session name: {}", name);
                }
                self.their_seq = seq;
                self.peer_options = options;
                self.reset_transmit();

                if self.encryption {
                    self.encryptor =
                        Some(Encryptor::new(Role::Client, self.preshared.clone()));
                    self.state = SessionState::EncryptedNew;
                } else {
                    self.state = SessionState::Established;
                }
                true
            }
            PacketBody::Fin { ref reason } => {
                log::warn!("session 0x{:04x} refused by peer: {}", self.id, reason);
                self.enter_shutdown(false);
                false
            }
            _ => {
                log::warn!(
                    "session 0x{:04x}: unexpected packet before handshake, dropping",
                    self.id
                );
                false
            }
        }
    }

    fn handle_in_encrypted_new(&mut self, packet: Packet) -> bool {
        match packet.body {
            PacketBody::Enc { body: EncBody::Init { public_key }, .. } => {
                let Some(encryptor) = self.encryptor.as_mut() else {
                    return false;
                };
                if let Err(e) = encryptor.set_their_public_key(&public_key) {
                    log::warn!("session 0x{:04x}: key exchange failed: {}", self.id, e);
                    // Abort this round; a fresh keypair goes out next tick.
                    self.encryptor =
                        Some(Encryptor::new(Role::Client, self.preshared.clone()));
                    self.reset_transmit();
                    return false;
                }

                match encryptor.sas() {
                    Ok(sas) => {
                        eprintln!("Encrypted session established. For added security, please verify the server also displays this string:");
                        eprintln!();
                        eprintln!("    {}", sas);
                        eprintln!();
                    }
                    Err(e) => log::warn!("could not render SAS: {}", e),
                }

                self.reset_transmit();
                if self.preshared.is_some() {
                    self.state = SessionState::EncryptedAuthed;
                } else {
                    self.state = SessionState::Established;
                }
                true
            }
            PacketBody::Fin { ref reason } => {
                log::warn!("session 0x{:04x} closed during key exchange: {}", self.id, reason);
                self.enter_shutdown(false);
                false
            }
            _ => {
                log::warn!(
                    "session 0x{:04x}: unexpected packet during key exchange",
                    self.id
                );
                false
            }
        }
    }

    fn handle_in_encrypted_authed(&mut self, packet: Packet) -> bool {
        match packet.body {
            PacketBody::Enc { body: EncBody::Auth { authenticator }, .. } => {
                let Some(encryptor) = self.encryptor.as_ref() else {
                    return false;
                };
                if !encryptor.verify_their_authenticator(&authenticator) {
                    log::warn!("session 0x{:04x}: dropping bad authenticator", self.id);
                    return false;
                }

                log::info!("session 0x{:04x}: peer authenticated", self.id);
                eprintln!("** Peer verified with the preshared secret!");
                self.reset_transmit();
                self.state = SessionState::Established;
                true
            }
            PacketBody::Fin { ref reason } => {
                log::warn!(
                    "session 0x{:04x} closed during authentication: {}",
                    self.id,
                    reason
                );
                self.enter_shutdown(false);
                false
            }
            _ => {
                log::warn!(
                    "session 0x{:04x}: unexpected packet during authentication",
                    self.id
                );
                false
            }
        }
    }

    async fn handle_in_established(&mut self, packet: Packet) -> bool {
        match packet.body {
            PacketBody::Msg { seq, ack, ref data } => {
                if seq != self.their_seq {
                    log::warn!(
                        "session 0x{:04x}: bad SEQ (expected 0x{:04x}, got 0x{:04x})",
                        self.id,
                        self.their_seq,
                        seq
                    );
                    return false;
                }

                let bytes_acked = ack.wrapping_sub(self.my_seq);
                if bytes_acked as usize > self.outgoing.len() {
                    log::warn!(
                        "session 0x{:04x}: bad ACK ({} bytes acked, {} outstanding)",
                        self.id,
                        bytes_acked,
                        self.outgoing.len()
                    );
                    return false;
                }

                self.reset_transmit();
                self.their_seq = self.their_seq.wrapping_add(data.len() as u16);
                if self.outgoing.consume(bytes_acked as usize).is_err() {
                    log::error!("session 0x{:04x}: ack outran the buffer", self.id);
                    return false;
                }
                self.my_seq = self.my_seq.wrapping_add(bytes_acked);

                let mut poll = bytes_acked != 0;
                if !data.is_empty() {
                    self.driver.data_received(data).await;
                    poll = true;
                }
                poll
            }
            PacketBody::Syn { .. } => {
                log::debug!("session 0x{:04x}: duplicate SYN, ignoring", self.id);
                false
            }
            PacketBody::Enc { body: EncBody::Init { public_key }, .. } => {
                // Peer-initiated renegotiation: answer with a fresh keypair.
                log::info!("session 0x{:04x}: peer renegotiating keys", self.id);
                let mut encryptor = Encryptor::new(Role::Client, self.preshared.clone());
                if let Err(e) = encryptor.set_their_public_key(&public_key) {
                    log::warn!("session 0x{:04x}: renegotiation failed: {}", self.id, e);
                    return false;
                }
                self.encryptor = Some(encryptor);
                self.state = SessionState::EncryptedNew;
                self.reset_transmit();
                true
            }
            PacketBody::Fin { ref reason } => {
                log::warn!("session 0x{:04x} closed by peer: {}", self.id, reason);
                self.enter_shutdown(false);
                false
            }
            _ => {
                log::warn!("session 0x{:04x}: unexpected packet, dropping", self.id);
                false
            }
        }
    }

    /// Local teardown: queue a FIN and stop the driver.
    pub fn force_close(&mut self, reason: &str) {
        if self.state == SessionState::Shutdown {
            return;
        }
        log::info!("session 0x{:04x}: closing ({})", self.id, reason);
        self.enter_shutdown(true);
    }
}
