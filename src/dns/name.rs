//! DNS name wire format
//!
//! Names are sequences of length-prefixed labels ending in a zero byte. A
//! length byte with the top two bits set is instead a pointer into the
//! message; reads follow pointers with a jump budget and a seen-offset
//! check so crafted messages cannot recurse forever.

use std::collections::HashSet;

use crate::buffer::ByteBuffer;
use crate::dns::DnsError;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_LABEL_LEN: usize = 63;

const POINTER_MASK: u8 = 0xc0;
const MAX_POINTER_JUMPS: usize = 16;

/// Read a name starting at `offset` within `message`.
///
/// Returns the dotted name (no trailing dot, empty string for the root)
/// and the number of bytes the name occupies at `offset`; pointers count
/// as two bytes there, however far they jump.
pub fn read_name(message: &[u8], offset: usize) -> Result<(String, usize), DnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut consumed: Option<usize> = None;
    let mut jumps = 0;
    let mut seen = HashSet::new();
    let mut total_len = 0usize;

    loop {
        let len_byte = *message.get(pos).ok_or(DnsError::Truncated(pos))?;

        if len_byte & POINTER_MASK == POINTER_MASK {
            let low = *message.get(pos + 1).ok_or(DnsError::Truncated(pos + 1))?;
            let target = ((len_byte & !POINTER_MASK) as usize) << 8 | low as usize;

            // Only the first pointer marks where the inline name ends.
            consumed.get_or_insert(pos + 2 - offset);

            if target >= message.len() {
                return Err(DnsError::BadPointer(target));
            }
            if !seen.insert(target) {
                return Err(DnsError::PointerLoop);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(DnsError::PointerLoop);
            }
            pos = target;
            continue;
        }

        if len_byte == 0 {
            consumed.get_or_insert(pos + 1 - offset);
            break;
        }

        let len = len_byte as usize;
        if len > MAX_LABEL_LEN {
            return Err(DnsError::LabelTooLong(format!("<{len} bytes>")));
        }
        let label_bytes = message
            .get(pos + 1..pos + 1 + len)
            .ok_or(DnsError::Truncated(pos + 1))?;
        let label = std::str::from_utf8(label_bytes)
            .map_err(|_| DnsError::InvalidLabel)?
            .to_string();

        total_len += len + 1;
        if total_len > MAX_NAME_LEN {
            return Err(DnsError::NameTooLong);
        }

        labels.push(label);
        pos += 1 + len;
    }

    Ok((labels.join("."), consumed.unwrap_or(1)))
}

/// Append a name in wire format, uncompressed.
pub fn write_name(buf: &mut ByteBuffer, name: &str) -> Result<(), DnsError> {
    if !name.is_empty() {
        let mut total = 0usize;
        for label in name.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(DnsError::LabelTooLong(label.to_string()));
            }
            if !label.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(DnsError::InvalidLabel);
            }
            total += label.len() + 1;
            if total > MAX_NAME_LEN {
                return Err(DnsError::NameTooLong);
            }
            buf.add_u8(label.len() as u8);
            buf.add_bytes(label.as_bytes());
        }
    }
    buf.add_u8(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_round_trips() {
        let mut buf = ByteBuffer::new();
        write_name(&mut buf, "tunnel.example.com").unwrap();
        assert_eq!(
            buf.as_slice(),
            b"\x06tunnel\x07example\x03com\x00"
        );

        let (name, used) = read_name(buf.as_slice(), 0).unwrap();
        assert_eq!(name, "tunnel.example.com");
        assert_eq!(used, buf.len());
    }

    #[test]
    fn root_name() {
        let mut buf = ByteBuffer::new();
        write_name(&mut buf, "").unwrap();
        assert_eq!(buf.as_slice(), &[0]);
        assert_eq!(read_name(buf.as_slice(), 0).unwrap(), (String::new(), 1));
    }

    #[test]
    fn compression_pointer_is_followed() {
        // "example.com" at offset 0, then "www" + pointer to it.
        let mut message = Vec::new();
        message.extend_from_slice(b"\x07example\x03com\x00");
        let tail = message.len();
        message.extend_from_slice(b"\x03www\xc0\x00");

        let (name, used) = read_name(&message, tail).unwrap();
        assert_eq!(name, "www.example.com");
        // Inline part: 1 + 3 label bytes + 2 pointer bytes.
        assert_eq!(used, 6);
    }

    #[test]
    fn pointer_loop_is_rejected() {
        // Two pointers chasing each other.
        let message = [0xc0, 0x02, 0xc0, 0x00];
        assert_eq!(read_name(&message, 0).unwrap_err(), DnsError::PointerLoop);
    }

    #[test]
    fn pointer_out_of_bounds_rejected() {
        let message = [0xc0, 0x7f];
        assert_eq!(read_name(&message, 0).unwrap_err(), DnsError::BadPointer(0x7f));
    }

    #[test]
    fn truncated_label_rejected() {
        let message = [0x05, b'a', b'b'];
        assert!(matches!(
            read_name(&message, 0).unwrap_err(),
            DnsError::Truncated(_)
        ));
    }

    #[test]
    fn oversized_label_rejected_on_write() {
        let long = "a".repeat(64);
        let mut buf = ByteBuffer::new();
        assert!(matches!(
            write_name(&mut buf, &long).unwrap_err(),
            DnsError::LabelTooLong(_)
        ));
    }

    #[test]
    fn oversized_name_rejected_on_write() {
        let name = std::iter::repeat("aaaaaaaa").take(40).collect::<Vec<_>>().join(".");
        let mut buf = ByteBuffer::new();
        assert_eq!(write_name(&mut buf, &name).unwrap_err(), DnsError::NameTooLong);
    }
}
