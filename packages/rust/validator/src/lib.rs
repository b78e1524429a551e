//! Protocol detection, structural validation and canonical forms.
//!
//! Detection is a closed dispatch: the URI scheme selects a [`Protocol`]
//! variant, and each variant has exactly one validator. Adding a protocol means
//! adding a variant, and the compiler points at every match that needs an arm.

mod shadowsocks;
mod ssr;
mod uri;
mod vmess;

use subharvest_shared::{Entry, Protocol, Rejection};

pub use uri::{UriParts, sort_query};

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub protocol: Protocol,
    /// Normalized form used for equality and output.
    pub canonical: String,
    /// Decoded human-readable name, if the entry carries one.
    pub remark: Option<String>,
}

impl Validated {
    /// Attach the originating source to produce an [`Entry`].
    pub fn into_entry(self, source_id: &str) -> Entry {
        Entry {
            protocol: self.protocol,
            canonical: self.canonical,
            source_id: source_id.to_string(),
            remark: self.remark,
        }
    }
}

/// Validate one candidate string.
pub fn validate(candidate: &str) -> Result<Validated, Rejection> {
    let (protocol, body) = detect(candidate)?;
    if body.trim().is_empty() {
        return Err(Rejection::Truncated);
    }

    match protocol {
        Protocol::Vless | Protocol::Trojan | Protocol::Tuic | Protocol::Hysteria2 => {
            uri::validate_credentialed(protocol, body)
        }
        Protocol::WireGuard => uri::validate_wireguard(body),
        Protocol::ShadowSocks => shadowsocks::validate(body),
        Protocol::ShadowSocksR => ssr::validate(body),
        Protocol::Vmess => vmess::validate(body),
    }
}

/// Validate a candidate and tag it with its source.
pub fn validate_entry(candidate: &str, source_id: &str) -> Result<Entry, Rejection> {
    validate(candidate).map(|v| v.into_entry(source_id))
}

/// Split `scheme://body` and resolve the scheme to a protocol.
fn detect(candidate: &str) -> Result<(Protocol, &str), Rejection> {
    let (scheme, body) = candidate
        .split_once("://")
        .ok_or(Rejection::UnknownPrefix)?;

    if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(Rejection::UnknownPrefix);
    }

    let protocol = Protocol::from_scheme(scheme).ok_or(Rejection::UnknownPrefix)?;
    Ok((protocol, body))
}

/// Percent-decode a remark, falling back to the raw text.
/// Fragment as it appears in a canonical form: ends trimmed, interior
/// whitespace percent-encoded. `#My Node` and `#My%20Node` render the same.
pub(crate) fn canonical_fragment(fragment: &str) -> Option<String> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(fragment.len());
    let mut buf = [0u8; 4];
    for c in fragment.chars() {
        if c.is_whitespace() {
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

pub(crate) fn decode_remark(fragment: &str) -> Option<String> {
    if fragment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(fragment)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| fragment.to_string());
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_string())
}
