//! Session I/O drivers
//!
//! A driver is the local end of a session: it produces the bytes the
//! session ships to the server and consumes the bytes that come back.
//! Drivers never see tunnel packets, only the unframed stream.

mod console;
mod exec;
mod ping;

pub use console::ConsoleDriver;
pub use exec::ExecDriver;
pub use ping::PingDriver;

use async_trait::async_trait;

/// Local byte source/sink for one session.
#[async_trait]
pub trait SessionDriver: Send {
    /// Deliver bytes that arrived from the peer, in order.
    async fn data_received(&mut self, data: &[u8]);

    /// Up to `max` bytes waiting to go out, or `None` when idle.
    fn get_outgoing(&mut self, max: usize) -> Option<Vec<u8>>;

    /// Stop producing and release local resources.
    async fn close(&mut self);

    /// True once the local end is finished and drained.
    fn is_shutdown(&self) -> bool;
}
