//! Payload decoding and candidate extraction.
//!
//! A fetched payload is first decoded according to its declared
//! [`SourceFormat`] into line-delimited text, then [`DecodedPayload::candidates`]
//! lazily yields one cleaned candidate string per non-blank, non-comment line.
//!
//! Decoding is the only fallible step. A payload that cannot be decoded at all
//! is reported as a [`HarvestError::Parse`] for the caller to record; it never
//! aborts the run.

mod cleanup;
mod html;
mod structured;

use subharvest_shared::encoding::{Base64Failure, decode_lenient_utf8, looks_like_base64};
use subharvest_shared::{HarvestError, Result, SourceFormat};
use tracing::debug;

pub use cleanup::clean_line;

/// Payload text after format decoding, ready to be split into candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    text: String,
    /// Format actually applied (`Auto` resolves to `Plain` or `Base64`).
    pub resolved: SourceFormat,
}

impl DecodedPayload {
    /// Lazily yield cleaned candidate strings.
    pub fn candidates(&self) -> impl Iterator<Item = &str> + '_ {
        self.text.lines().filter_map(clean_line)
    }
}

/// Decode a raw payload body according to its declared format.
pub fn decode(format: SourceFormat, body: &str) -> Result<DecodedPayload> {
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);

    let (text, resolved) = match format {
        SourceFormat::Plain => (decode_plain(body)?, SourceFormat::Plain),
        SourceFormat::Base64 => (decode_base64(body)?, SourceFormat::Base64),
        SourceFormat::Html => (html::extract_entries(body), SourceFormat::Html),
        SourceFormat::Json => (structured::extract_entries(body)?, SourceFormat::Json),
        SourceFormat::Auto => match try_base64_subscription(body) {
            Some(decoded) => (decoded, SourceFormat::Base64),
            None => (decode_plain(body)?, SourceFormat::Plain),
        },
    };

    debug!(declared = %format, %resolved, bytes = text.len(), "payload decoded");

    Ok(DecodedPayload { text, resolved })
}

fn decode_plain(body: &str) -> Result<String> {
    if body.contains('\0') {
        return Err(HarvestError::parse("payload contains NUL bytes, not text"));
    }
    Ok(body.to_string())
}

fn decode_base64(body: &str) -> Result<String> {
    decode_lenient_utf8(body.trim()).map_err(|failure| match failure {
        Base64Failure::Truncated => HarvestError::parse("base64 block is truncated"),
        Base64Failure::Invalid => HarvestError::parse("payload is not valid base64 text"),
    })
}

/// Treat the body as a base64 subscription only if it is one clean block whose
/// decoded text looks like a URI list.
fn try_base64_subscription(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if !looks_like_base64(trimmed) {
        return None;
    }
    decode_lenient_utf8(trimmed)
        .ok()
        .filter(|decoded| decoded.contains("://"))
}
