//! dnscat packet codec
//!
//! Every payload crossing the tunnel is one of these small fixed-format
//! packets: a 5-byte header (packet id, type tag, session id) followed by
//! a type-specific body. All integers are big-endian. The codec is a pure
//! function of bytes; freshness, sequencing and retransmission live in
//! the session layer.

use std::fmt;

use thiserror::Error;

use crate::buffer::{BufferError, ByteBuffer};

/// Hard cap on a serialised packet.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Fixed header: packet_id(2) + type(1) + session_id(2).
pub const HEADER_LEN: usize = 5;

/// Wire overhead of a MSG packet (header + seq + ack).
pub const MSG_OVERHEAD: usize = HEADER_LEN + 4;

/// SYN option bits. 0x02 and 0x04 are legacy, carried but ignored.
pub mod options {
    pub const NAME: u16 = 0x0001;
    pub const DOWNLOAD: u16 = 0x0008;
    pub const CHUNKED_DOWNLOAD: u16 = 0x0010;
    pub const COMMAND: u16 = 0x0020;
}

const TYPE_SYN: u8 = 0x00;
const TYPE_MSG: u8 = 0x01;
const TYPE_FIN: u8 = 0x02;
const TYPE_ENC: u8 = 0x03;
const TYPE_PING: u8 = 0xff;

const ENC_SUBTYPE_INIT: u16 = 0x0000;
const ENC_SUBTYPE_AUTH: u16 = 0x0001;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),

    #[error("unknown encryption subtype 0x{0:04x}")]
    UnknownEncSubtype(u16),

    #[error("packet too long: {0} bytes")]
    TooLong(usize),

    #[error("packet truncated: {0}")]
    Truncated(#[from] BufferError),
}

/// ENC packet payload: INIT exchanges public keys, AUTH exchanges
/// preshared-secret authenticators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncBody {
    Init { public_key: [u8; 64] },
    Auth { authenticator: [u8; 32] },
}

/// The type-specific portion of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Syn {
        seq: u16,
        options: u16,
        name: Option<String>,
    },
    Msg {
        seq: u16,
        ack: u16,
        data: Vec<u8>,
    },
    Fin {
        reason: String,
    },
    Ping {
        ping_id: u16,
        data: String,
    },
    Enc {
        flags: u16,
        body: EncBody,
    },
}

/// One dnscat packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_id: u16,
    pub session_id: u16,
    pub body: PacketBody,
}

impl Packet {
    fn new(session_id: u16, body: PacketBody) -> Self {
        Self {
            packet_id: rand::random::<u16>(),
            session_id,
            body,
        }
    }

    /// Build a SYN. The NAME option bit tracks the presence of `name`.
    pub fn syn(session_id: u16, seq: u16, mut opts: u16, name: Option<String>) -> Self {
        if name.is_some() {
            opts |= options::NAME;
        } else {
            opts &= !options::NAME;
        }
        Self::new(session_id, PacketBody::Syn { seq, options: opts, name })
    }

    pub fn msg(session_id: u16, seq: u16, ack: u16, data: Vec<u8>) -> Self {
        Self::new(session_id, PacketBody::Msg { seq, ack, data })
    }

    pub fn fin(session_id: u16, reason: impl Into<String>) -> Self {
        Self::new(session_id, PacketBody::Fin { reason: reason.into() })
    }

    pub fn ping(session_id: u16, ping_id: u16, data: impl Into<String>) -> Self {
        Self::new(session_id, PacketBody::Ping { ping_id, data: data.into() })
    }

    pub fn enc_init(session_id: u16, public_key: [u8; 64]) -> Self {
        Self::new(
            session_id,
            PacketBody::Enc { flags: 0, body: EncBody::Init { public_key } },
        )
    }

    pub fn enc_auth(session_id: u16, authenticator: [u8; 32]) -> Self {
        Self::new(
            session_id,
            PacketBody::Enc { flags: 0, body: EncBody::Auth { authenticator } },
        )
    }

    /// Wire tag for this packet's body.
    pub fn type_tag(&self) -> u8 {
        match self.body {
            PacketBody::Syn { .. } => TYPE_SYN,
            PacketBody::Msg { .. } => TYPE_MSG,
            PacketBody::Fin { .. } => TYPE_FIN,
            PacketBody::Enc { .. } => TYPE_ENC,
            PacketBody::Ping { .. } => TYPE_PING,
        }
    }

    /// Decode one packet from the full wire bytes.
    pub fn parse(data: &[u8]) -> Result<Packet, PacketError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLong(data.len()));
        }

        let mut buf = ByteBuffer::with_data(data);
        let packet_id = buf.read_u16()?;
        let type_tag = buf.read_u8()?;
        let session_id = buf.read_u16()?;

        let body = match type_tag {
            TYPE_SYN => {
                let seq = buf.read_u16()?;
                let opts = buf.read_u16()?;
                let name = if opts & options::NAME != 0 {
                    Some(buf.read_ntstring()?)
                } else {
                    None
                };
                PacketBody::Syn { seq, options: opts, name }
            }
            TYPE_MSG => PacketBody::Msg {
                seq: buf.read_u16()?,
                ack: buf.read_u16()?,
                data: buf.read_remaining(),
            },
            TYPE_FIN => PacketBody::Fin {
                reason: buf.read_ntstring()?,
            },
            TYPE_PING => PacketBody::Ping {
                ping_id: buf.read_u16()?,
                data: buf.read_ntstring()?,
            },
            TYPE_ENC => {
                let subtype = buf.read_u16()?;
                let flags = buf.read_u16()?;
                let body = match subtype {
                    ENC_SUBTYPE_INIT => EncBody::Init { public_key: buf.read_array()? },
                    ENC_SUBTYPE_AUTH => EncBody::Auth { authenticator: buf.read_array()? },
                    other => return Err(PacketError::UnknownEncSubtype(other)),
                };
                PacketBody::Enc { flags, body }
            }
            other => return Err(PacketError::UnknownType(other)),
        };

        Ok(Packet { packet_id, session_id, body })
    }

    /// Serialise, same field order as `parse`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.add_u16(self.packet_id);
        buf.add_u8(self.type_tag());
        buf.add_u16(self.session_id);

        match &self.body {
            PacketBody::Syn { seq, options, name } => {
                buf.add_u16(*seq);
                buf.add_u16(*options);
                if let Some(name) = name {
                    buf.add_ntstring(name);
                }
            }
            PacketBody::Msg { seq, ack, data } => {
                buf.add_u16(*seq);
                buf.add_u16(*ack);
                buf.add_bytes(data);
            }
            PacketBody::Fin { reason } => buf.add_ntstring(reason),
            PacketBody::Ping { ping_id, data } => {
                buf.add_u16(*ping_id);
                buf.add_ntstring(data);
            }
            PacketBody::Enc { flags, body } => {
                match body {
                    EncBody::Init { .. } => buf.add_u16(ENC_SUBTYPE_INIT),
                    EncBody::Auth { .. } => buf.add_u16(ENC_SUBTYPE_AUTH),
                }
                buf.add_u16(*flags);
                match body {
                    EncBody::Init { public_key } => buf.add_bytes(public_key),
                    EncBody::Auth { authenticator } => buf.add_bytes(authenticator),
                }
            }
        }

        buf.into_vec()
    }
}

/// Read only the session id out of the fixed header, without touching the
/// body. Used to route packets whose body may still be encrypted.
pub fn peek_session_id(data: &[u8]) -> Result<u16, PacketError> {
    let mut buf = ByteBuffer::with_data(data);
    let _packet_id = buf.read_u16()?;
    let _type = buf.read_u8()?;
    Ok(buf.read_u16()?)
}

/// The body variant, readable from the cleartext header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Syn,
    Msg,
    Fin,
    Enc,
    Ping,
}

/// Classify a packet (or encrypted frame) by its header type tag.
pub fn peek_kind(data: &[u8]) -> Result<PacketKind, PacketError> {
    let tag = *data.get(2).ok_or(PacketError::Truncated(BufferError::Truncated {
        needed: 3,
        available: data.len(),
    }))?;
    match tag {
        TYPE_SYN => Ok(PacketKind::Syn),
        TYPE_MSG => Ok(PacketKind::Msg),
        TYPE_FIN => Ok(PacketKind::Fin),
        TYPE_ENC => Ok(PacketKind::Enc),
        TYPE_PING => Ok(PacketKind::Ping),
        other => Err(PacketError::UnknownType(other)),
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            PacketBody::Syn { seq, options, name } => write!(
                f,
                "SYN [0x{:04x}] session=0x{:04x} seq=0x{:04x} options=0x{:04x} name={:?}",
                self.packet_id, self.session_id, seq, options, name
            ),
            PacketBody::Msg { seq, ack, data } => write!(
                f,
                "MSG [0x{:04x}] session=0x{:04x} seq=0x{:04x} ack=0x{:04x} data={} bytes",
                self.packet_id,
                self.session_id,
                seq,
                ack,
                data.len()
            ),
            PacketBody::Fin { reason } => write!(
                f,
                "FIN [0x{:04x}] session=0x{:04x} reason={:?}",
                self.packet_id, self.session_id, reason
            ),
            PacketBody::Ping { ping_id, data } => write!(
                f,
                "PING [0x{:04x}] ping_id=0x{:04x} data={:?}",
                self.packet_id, ping_id, data
            ),
            PacketBody::Enc { flags, body } => {
                let subtype = match body {
                    EncBody::Init { .. } => "INIT",
                    EncBody::Auth { .. } => "AUTH",
                };
                write!(
                    f,
                    "ENC/{} [0x{:04x}] session=0x{:04x} flags=0x{:04x}",
                    subtype, self.packet_id, self.session_id, flags
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) {
        let bytes = packet.to_bytes();
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn syn_wire_layout() {
        let packet = Packet {
            packet_id: 0xaabb,
            session_id: 0x0042,
            body: PacketBody::Syn {
                seq: 0x1234,
                options: 0x0021,
                name: Some("t".to_string()),
            },
        };

        let bytes = packet.to_bytes();
        assert_eq!(
            bytes,
            vec![0xaa, 0xbb, 0x00, 0x00, 0x42, 0x12, 0x34, 0x00, 0x21, b't', 0x00]
        );
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn syn_without_name_omits_string() {
        let packet = Packet::syn(1, 0x1000, options::COMMAND, None);
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        round_trip(packet);
    }

    #[test]
    fn syn_name_forces_option_bit() {
        let packet = Packet::syn(1, 0, 0, Some("shell".into()));
        match &packet.body {
            PacketBody::Syn { options, .. } => assert_eq!(options & options::NAME, options::NAME),
            _ => unreachable!(),
        }
        round_trip(packet);
    }

    #[test]
    fn msg_wire_layout() {
        let packet = Packet {
            packet_id: 0x0001,
            session_id: 0x0042,
            body: PacketBody::Msg {
                seq: 0x1234,
                ack: 0x5678,
                data: vec![0x41, 0x42, 0x43],
            },
        };
        let bytes = packet.to_bytes();
        assert_eq!(
            bytes,
            vec![0x00, 0x01, 0x01, 0x00, 0x42, 0x12, 0x34, 0x56, 0x78, 0x41, 0x42, 0x43]
        );
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn msg_empty_data() {
        round_trip(Packet::msg(7, 0xffff, 0x0000, vec![]));
    }

    #[test]
    fn fin_ping_enc_round_trip() {
        round_trip(Packet::fin(3, "process exited"));
        round_trip(Packet::ping(0, 0xbeef, "are you there"));
        round_trip(Packet::enc_init(9, [0x5a; 64]));
        round_trip(Packet::enc_auth(9, [0xa5; 32]));
    }

    #[test]
    fn size_boundary() {
        // Header + seq/ack + data, padded to land exactly on the cap.
        let data = vec![0u8; MAX_PACKET_SIZE - MSG_OVERHEAD];
        let packet = Packet::msg(1, 0, 0, data);
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), MAX_PACKET_SIZE);
        assert!(Packet::parse(&bytes).is_ok());

        let mut too_long = bytes;
        too_long.push(0);
        assert_eq!(
            Packet::parse(&too_long),
            Err(PacketError::TooLong(MAX_PACKET_SIZE + 1))
        );
    }

    #[test]
    fn unknown_type_rejected() {
        let bytes = [0x00, 0x01, 0x77, 0x00, 0x42];
        assert_eq!(Packet::parse(&bytes), Err(PacketError::UnknownType(0x77)));
    }

    #[test]
    fn truncated_header_rejected() {
        assert!(matches!(
            Packet::parse(&[0x00, 0x01, 0x00]),
            Err(PacketError::Truncated(_))
        ));
    }

    #[test]
    fn truncated_enc_key_rejected() {
        // ENC/INIT with only half a public key.
        let mut bytes = vec![0x00, 0x01, 0x03, 0x00, 0x42, 0x00, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(matches!(Packet::parse(&bytes), Err(PacketError::Truncated(_))));
    }

    #[test]
    fn peek_session_id_reads_header_only() {
        let packet = Packet::msg(0x1337, 0, 0, vec![1, 2, 3]);
        assert_eq!(peek_session_id(&packet.to_bytes()).unwrap(), 0x1337);
        assert!(peek_session_id(&[0x00, 0x01]).is_err());
    }
}
