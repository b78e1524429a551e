//! Structural parsing of `scheme://[userinfo@]host:port[/path][?query][#fragment]`.
//!
//! The body is split by hand rather than through `url::Url`, because `Url`
//! re-encodes userinfo and paths and the canonical form must keep credentials
//! and values byte-for-byte. Hosts are still checked with [`url::Host`].

use subharvest_shared::{Protocol, Rejection};
use url::Host;

use crate::{Validated, canonical_fragment, decode_remark};

/// Components of a URI-style entry body (everything after `://`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriParts<'a> {
    pub userinfo: Option<&'a str>,
    /// Normalized host (lowercased domain, compressed IPv6 in brackets).
    pub host: String,
    pub port: u16,
    /// Path with a lone `/` dropped.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> UriParts<'a> {
    /// Parse an entry body. Requires a host and a non-zero port.
    pub fn parse(body: &'a str) -> Result<Self, Rejection> {
        let body = body.trim();

        let (rest, fragment) = match body.split_once('#') {
            Some((rest, frag)) => (rest, Some(frag)),
            None => (body, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, q)) => (rest, Some(q)),
            None => (rest, None),
        };
        // Userinfo may itself contain '/' (standard base64), so the path starts
        // at the first '/' after the last '@'.
        let host_start = rest.rfind('@').map_or(0, |i| i + 1);
        let (authority, path) = match rest[host_start..].find('/') {
            Some(idx) => rest.split_at(host_start + idx),
            None => (rest, ""),
        };

        if authority.is_empty() {
            return Err(Rejection::Truncated);
        }

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((ui, hp)) => (Some(ui), hp),
            None => (None, authority),
        };
        if hostport.is_empty() {
            return Err(Rejection::Truncated);
        }

        let (raw_host, raw_port) = split_host_port(hostport)?;
        let host = parse_host(raw_host)?;
        let port = parse_port(raw_port)?;

        Ok(Self {
            userinfo,
            host,
            port,
            path: if path == "/" { "" } else { path },
            query: query.filter(|q| !q.is_empty()),
            fragment: fragment.filter(|f| !f.is_empty()),
        })
    }

    /// Value of the first query parameter named `key` (raw, not decoded).
    pub fn query_param(&self, key: &str) -> Option<&'a str> {
        self.query?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Render the canonical form under `scheme`.
    pub fn canonical(&self, scheme: &str) -> String {
        let mut out = format!("{scheme}://");
        if let Some(ui) = self.userinfo {
            out.push_str(ui);
            out.push('@');
        }
        out.push_str(&self.host);
        out.push(':');
        out.push_str(&self.port.to_string());
        out.push_str(self.path);
        if let Some(q) = self.query {
            let sorted = sort_query(q);
            if !sorted.is_empty() {
                out.push('?');
                out.push_str(&sorted);
            }
        }
        if let Some(f) = self.fragment.and_then(canonical_fragment) {
            out.push('#');
            out.push_str(&f);
        }
        out
    }

    pub fn remark(&self) -> Option<String> {
        self.fragment.and_then(decode_remark)
    }
}

/// Sort query pairs by key, keeping the relative order of repeated keys and
/// dropping empty pairs.
pub fn sort_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_by_key(|pair| pair.split_once('=').map_or(*pair, |(k, _)| k));
    pairs.join("&")
}

fn split_host_port(hostport: &str) -> Result<(&str, &str), Rejection> {
    if hostport.starts_with('[') {
        let end = hostport
            .find(']')
            .ok_or_else(|| Rejection::malformed("host", "unterminated IPv6 literal"))?;
        let (host, rest) = hostport.split_at(end + 1);
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, port)),
            None if rest.is_empty() => Err(Rejection::malformed("port", "missing")),
            None => Err(Rejection::malformed("host", "junk after IPv6 literal")),
        };
    }

    hostport
        .rsplit_once(':')
        .ok_or_else(|| Rejection::malformed("port", "missing"))
}

pub(crate) fn parse_host(raw: &str) -> Result<String, Rejection> {
    if raw.is_empty() {
        return Err(Rejection::malformed("host", "empty"));
    }
    let host = Host::parse(raw).map_err(|e| Rejection::malformed("host", e.to_string()))?;
    match &host {
        Host::Domain(d) if d.is_empty() => Err(Rejection::malformed("host", "empty")),
        _ => Ok(host.to_string()),
    }
}

pub(crate) fn parse_port(raw: &str) -> Result<u16, Rejection> {
    if raw.is_empty() {
        return Err(Rejection::Truncated);
    }
    match raw.parse::<u16>() {
        Ok(0) => Err(Rejection::malformed("port", "zero")),
        Ok(port) => Ok(port),
        Err(_) => Err(Rejection::malformed("port", format!("'{raw}' is not 1-65535"))),
    }
}

/// Protocols that carry a credential in the userinfo (`vless`, `trojan`,
/// `tuic`, `hysteria2`).
pub(crate) fn validate_credentialed(
    protocol: Protocol,
    body: &str,
) -> Result<Validated, Rejection> {
    let parts = UriParts::parse(body)?;
    match parts.userinfo {
        Some(ui) if !ui.is_empty() && !ui.starts_with(':') => {}
        _ => return Err(Rejection::malformed("userinfo", "credential missing")),
    }

    Ok(Validated {
        protocol,
        canonical: parts.canonical(protocol.canonical_scheme()),
        remark: parts.remark(),
    })
}

/// `wireguard://<private key>@host:port?publickey=...`
pub(crate) fn validate_wireguard(body: &str) -> Result<Validated, Rejection> {
    let parts = UriParts::parse(body)?;
    if parts.userinfo.is_none_or(str::is_empty) {
        return Err(Rejection::malformed("userinfo", "private key missing"));
    }
    let public_key = parts
        .query_param("publickey")
        .or_else(|| parts.query_param("public_key"));
    if public_key.is_none_or(str::is_empty) {
        return Err(Rejection::malformed("publickey", "missing"));
    }

    Ok(Validated {
        protocol: Protocol::WireGuard,
        canonical: parts.canonical(Protocol::WireGuard.canonical_scheme()),
        remark: parts.remark(),
    })
}
