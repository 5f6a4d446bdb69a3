//! Session controller
//!
//! Owns the set of sessions and sits between them and the tunnel driver:
//! one `incoming` entry point that routes by session id, one `outgoing`
//! exit point that round-robins the available bandwidth so a bulk
//! session cannot starve an interactive one.

use crate::packet::peek_session_id;
use crate::session::Session;

pub struct Controller {
    sessions: Vec<Session>,
    /// Index of the last session that got an outgoing slot.
    cursor: usize,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            cursor: 0,
        }
    }

    pub fn add_session(&mut self, session: Session) {
        log::debug!("tracking session 0x{:04x}", session.id());
        self.sessions.push(session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_shutdown()).count()
    }

    /// True once every session has torn down and been reaped.
    pub fn is_finished(&self) -> bool {
        self.sessions.is_empty()
    }

    fn find_session(&mut self, session_id: u16) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == session_id)
    }

    /// Route one inbound packet to its session. Returns true when the
    /// session wants an immediate poll instead of waiting for the timer.
    pub async fn incoming(&mut self, data: &[u8]) -> bool {
        let session_id = match peek_session_id(data) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("dropping unroutable packet: {}", e);
                return false;
            }
        };

        match self.find_session(session_id) {
            Some(session) => session.handle_incoming(data).await,
            None => {
                log::warn!("dropping packet for unknown session 0x{:04x}", session_id);
                false
            }
        }
    }

    /// The next packet to send, at most `max` bytes. Walks the session
    /// list once starting after the cursor, so every session gets a turn.
    pub fn outgoing(&mut self, max: usize) -> Option<Vec<u8>> {
        let count = self.sessions.len();
        for offset in 1..=count {
            let index = (self.cursor + offset) % count;
            if let Some(bytes) = self.sessions[index].get_outgoing(max) {
                self.cursor = index;
                return Some(bytes);
            }
        }
        None
    }

    /// Let every session pull from its driver and finish teardown work.
    pub async fn pump_drivers(&mut self) {
        for session in &mut self.sessions {
            session.pump_driver().await;
        }
    }

    /// Drop sessions that have FIN'd and drained.
    pub fn reap(&mut self) {
        let before = self.sessions.len();
        self.sessions.retain(|session| {
            if session.is_removable() {
                log::info!("session 0x{:04x} closed, removing", session.id());
                false
            } else {
                true
            }
        });
        if self.sessions.len() != before {
            self.cursor = 0;
        }
    }

    /// Post a teardown to every session; used on operator shutdown.
    pub fn shutdown_all(&mut self, reason: &str) {
        for session in &mut self.sessions {
            session.force_close(reason);
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
