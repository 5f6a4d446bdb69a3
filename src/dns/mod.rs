//! RFC 1035 message codec
//!
//! Just enough DNS to run the tunnel: questions and answers for the
//! record types the transport can ride on (A, AAAA, CNAME, NS, MX, TXT),
//! parsed with exact wire fidelity. Compression pointers are followed on
//! read with a bounded jump count, since a hostile resolver could loop
//! them, and never emitted on write.

mod codec;
mod name;

pub use codec::{Message, Opcode, Question, RData, Rcode, Record, RecordType, CLASS_IN};
pub use name::{read_name, write_name, MAX_LABEL_LEN, MAX_NAME_LEN};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),

    #[error("compression pointer to offset {0} is out of bounds")]
    BadPointer(usize),

    #[error("compression pointers form a loop")]
    PointerLoop,

    #[error("name exceeds {MAX_NAME_LEN} bytes")]
    NameTooLong,

    #[error("label {0:?} exceeds {MAX_LABEL_LEN} bytes")]
    LabelTooLong(String),

    #[error("label is not printable ASCII")]
    InvalidLabel,

    #[error("TXT record data exceeds 255 bytes")]
    TxtTooLong,

    #[error("record data length {0} does not match type")]
    BadRecordLength(usize),
}
