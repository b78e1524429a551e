//! Lenient base64 decoding shared by the parser and the validator.
//!
//! Subscription payloads arrive in every base64 flavour: standard or URL-safe
//! alphabet, padded or not, wrapped at 76 columns. Both alphabets are accepted
//! and whitespace is ignored.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Why a base64 block could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Failure {
    /// Input was empty or ended mid-quantum.
    Truncated,
    /// Input contained bytes outside both alphabets.
    Invalid,
}

/// Decode a base64 block in either alphabet, ignoring whitespace and padding.
pub fn decode_lenient(input: &str) -> Result<Vec<u8>, Base64Failure> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.trim_end_matches('=').is_empty() {
        return Err(Base64Failure::Truncated);
    }

    let engine = if cleaned.contains(['-', '_']) {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };

    engine.decode(cleaned.as_bytes()).map_err(|e| match e {
        base64::DecodeError::InvalidLength(_) => Base64Failure::Truncated,
        _ => Base64Failure::Invalid,
    })
}

/// Decode a base64 block and require the result to be UTF-8 text.
pub fn decode_lenient_utf8(input: &str) -> Result<String, Base64Failure> {
    let bytes = decode_lenient(input)?;
    String::from_utf8(bytes).map_err(|_| Base64Failure::Invalid)
}

/// Cheap pre-check: every non-whitespace byte belongs to a base64 alphabet.
pub fn looks_like_base64(input: &str) -> bool {
    let mut saw_any = false;
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' | b'-' | b'_' | b'=' => {
                saw_any = true;
            }
            b' ' | b'\t' | b'\r' | b'\n' => {}
            _ => return false,
        }
    }
    saw_any
}
