//! `ssr://base64url(host:port:protocol:method:obfs:base64pass[/?params])` entries.

use subharvest_shared::encoding::{decode_lenient, decode_lenient_utf8};
use subharvest_shared::{Protocol, Rejection};

use crate::Validated;
use crate::shadowsocks::base64_rejection;
use crate::uri::{parse_host, parse_port};

pub(crate) fn validate(body: &str) -> Result<Validated, Rejection> {
    let payload: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = decode_lenient_utf8(&payload).map_err(|f| base64_rejection(f, "payload"))?;

    let (main, params) = match decoded.split_once("/?") {
        Some((m, p)) => (m, Some(p)),
        None => (decoded.trim_end_matches('/'), None),
    };

    // Split from the right so an unbracketed IPv6 host keeps its colons.
    let fields: Vec<&str> = main.rsplitn(6, ':').collect();
    let [password, obfs, method, protocol, port, host] = fields.as_slice() else {
        return Err(Rejection::malformed(
            "payload",
            "expected host:port:protocol:method:obfs:password",
        ));
    };

    if host.contains(':') {
        parse_host(&format!("[{host}]"))?;
    } else {
        parse_host(host)?;
    }
    parse_port(port)?;
    for (name, value) in [("protocol", protocol), ("method", method), ("obfs", obfs)] {
        if value.is_empty() {
            return Err(Rejection::malformed(name, "empty"));
        }
    }
    decode_lenient(password).map_err(|f| base64_rejection(f, "password"))?;

    Ok(Validated {
        protocol: Protocol::ShadowSocksR,
        canonical: format!("{}://{payload}", Protocol::ShadowSocksR.canonical_scheme()),
        remark: params.and_then(remarks_param),
    })
}

/// `remarks` is itself base64url-encoded.
fn remarks_param(params: &str) -> Option<String> {
    let raw = params
        .split('&')
        .find_map(|pair| pair.strip_prefix("remarks="))?;
    decode_lenient_utf8(raw)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
