//! Byte-to-text codecs for DNS-safe payloads
//!
//! The tunnel carries packet bytes inside DNS names, so payloads have to
//! survive case folding and label splitting. Hex is the load-bearing
//! encoding; base32 is kept as the denser alternative for record types
//! that tolerate it.

use data_encoding::BASE32_NOPAD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("hex string has odd length")]
    OddLength,

    #[error("non-hex character {0:?} in encoded name")]
    BadHexDigit(char),

    #[error("invalid base32: {0}")]
    BadBase32(String),
}

/// Lowercase hex encode.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Hex decode, ignoring `.` label separators.
///
/// DNS names interleave dots with the encoded payload; the dots carry no
/// data. Mixed case is accepted since resolvers may fold case in flight.
pub fn hex_decode_name(name: &str) -> Result<Vec<u8>, EncodingError> {
    let digits: String = name.chars().filter(|&c| c != '.').collect();

    if digits.len() % 2 != 0 {
        return Err(EncodingError::OddLength);
    }
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(EncodingError::BadHexDigit(bad));
    }

    // Infallible after the checks above.
    Ok(hex::decode(&digits).unwrap_or_default())
}

/// Unpadded base32 encode (uppercase alphabet, DNS-safe).
pub fn base32_encode(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data)
}

/// Unpadded base32 decode; accepts lowercase from case-folding resolvers.
pub fn base32_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    BASE32_NOPAD
        .decode(text.to_ascii_uppercase().as_bytes())
        .map_err(|e| EncodingError::BadBase32(e.to_string()))
}
