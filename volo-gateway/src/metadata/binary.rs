use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    DecodeError, Engine,
};
use bytes::Bytes;

use super::BINARY_HEADER_SUFFIX;

/// Whether a canonical header name carries a base64 encoded binary value.
#[inline]
pub fn is_binary_header(name: &str) -> bool {
    name.ends_with(BINARY_HEADER_SUFFIX)
}

/// Decodes the value of a `-Bin` header.
///
/// Values whose length is a multiple of four are decoded as padded base64 (padding may also
/// have been unnecessary), anything else as unpadded base64.
///
/// The decoded bytes are meant to be stored as is: the gRPC transport base64 encodes binary
/// metadata again before sending it.
pub fn decode_bin_header(value: &[u8]) -> Result<Bytes, DecodeError> {
    let decoded = if value.len() % 4 == 0 {
        STANDARD.decode(value)?
    } else {
        STANDARD_NO_PAD.decode(value)?
    };
    Ok(Bytes::from(decoded))
}

/// Encodes a binary metadata value for an HTTP header, without padding.
pub fn encode_bin_header(value: &[u8]) -> String {
    STANDARD_NO_PAD.encode(value)
}
