//! `vmess://base64(JSON)` entries.

use serde_json::Value;
use subharvest_shared::encoding::decode_lenient_utf8;
use subharvest_shared::{Protocol, Rejection};

use crate::shadowsocks::base64_rejection;
use crate::{Validated, canonical_fragment, decode_remark};

pub(crate) fn validate(body: &str) -> Result<Validated, Rejection> {
    let (raw_payload, fragment) = match body.trim().split_once('#') {
        Some((p, f)) => (p, Some(f).filter(|f| !f.trim().is_empty())),
        None => (body.trim(), None),
    };
    // Base64 wrapped across lines is still one payload.
    let payload: String = raw_payload.chars().filter(|c| !c.is_whitespace()).collect();

    let json = decode_lenient_utf8(&payload).map_err(|f| base64_rejection(f, "payload"))?;
    let value: Value = serde_json::from_str(&json).map_err(|e| {
        if e.is_eof() {
            Rejection::Truncated
        } else {
            Rejection::malformed("payload", format!("not JSON: {e}"))
        }
    })?;
    let obj = value
        .as_object()
        .ok_or_else(|| Rejection::malformed("payload", "not a JSON object"))?;

    let non_empty = |key: &'static str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Rejection::malformed(key, "missing or empty"))
    };
    non_empty("add")?;
    non_empty("id")?;
    check_port(obj.get("port"))?;

    let remark = obj
        .get("ps")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| fragment.and_then(decode_remark));

    let mut canonical = format!("{}://{payload}", Protocol::Vmess.canonical_scheme());
    if let Some(f) = fragment.and_then(canonical_fragment) {
        canonical.push('#');
        canonical.push_str(&f);
    }

    Ok(Validated {
        protocol: Protocol::Vmess,
        canonical,
        remark,
    })
}

fn check_port(port: Option<&Value>) -> Result<(), Rejection> {
    let number = match port {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => return Err(Rejection::malformed("port", "missing")),
    };
    match number {
        Some(p) if (1..=65535).contains(&p) => Ok(()),
        _ => Err(Rejection::malformed("port", "not 1-65535")),
    }
}
