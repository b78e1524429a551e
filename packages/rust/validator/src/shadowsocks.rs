//! `ss://` entries, SIP002 and legacy forms.
//!
//! - SIP002: `ss://base64(method:password)@host:port[/][?plugin=...][#remark]`,
//!   or the same with a plain percent-encoded `method:password` userinfo.
//! - Legacy: `ss://base64(method:password@host:port)[#remark]`.

use subharvest_shared::encoding::{Base64Failure, decode_lenient_utf8};
use subharvest_shared::{Protocol, Rejection};

use crate::uri::UriParts;
use crate::{Validated, canonical_fragment, decode_remark};

pub(crate) fn validate(body: &str) -> Result<Validated, Rejection> {
    let body = body.trim();
    let (before_fragment, fragment) = match body.split_once('#') {
        Some((b, f)) => (b, Some(f).filter(|f| !f.is_empty())),
        None => (body, None),
    };

    if before_fragment.contains('@') {
        validate_sip002(body)
    } else {
        validate_legacy(before_fragment, fragment)
    }
}

fn validate_sip002(body: &str) -> Result<Validated, Rejection> {
    let parts = UriParts::parse(body)?;
    let userinfo = parts
        .userinfo
        .filter(|ui| !ui.is_empty())
        .ok_or_else(|| Rejection::malformed("userinfo", "credentials missing"))?;

    let decoded = urlencoding::decode(userinfo)
        .map_err(|_| Rejection::malformed("userinfo", "invalid percent-encoding"))?;
    if decoded.contains(':') {
        check_method_password(&decoded)?;
    } else {
        let plain = decode_lenient_utf8(&decoded).map_err(|f| base64_rejection(f, "userinfo"))?;
        check_method_password(&plain)?;
    }

    Ok(Validated {
        protocol: Protocol::ShadowSocks,
        canonical: parts.canonical(Protocol::ShadowSocks.canonical_scheme()),
        remark: parts.remark(),
    })
}

fn validate_legacy(payload: &str, fragment: Option<&str>) -> Result<Validated, Rejection> {
    let payload = payload.trim_end_matches('/');
    let decoded = decode_lenient_utf8(payload).map_err(|f| base64_rejection(f, "payload"))?;

    let (credentials, hostport) = decoded
        .rsplit_once('@')
        .ok_or_else(|| Rejection::malformed("payload", "expected method:password@host:port"))?;
    check_method_password(credentials)?;
    UriParts::parse(hostport)?;

    let mut canonical = format!("{}://{payload}", Protocol::ShadowSocks.canonical_scheme());
    if let Some(f) = fragment.and_then(canonical_fragment) {
        canonical.push('#');
        canonical.push_str(&f);
    }

    Ok(Validated {
        protocol: Protocol::ShadowSocks,
        canonical,
        remark: fragment.and_then(decode_remark),
    })
}

fn check_method_password(credentials: &str) -> Result<(), Rejection> {
    match credentials.split_once(':') {
        Some((method, _)) if !method.trim().is_empty() => Ok(()),
        Some(_) => Err(Rejection::malformed("method", "empty")),
        None => Err(Rejection::malformed("userinfo", "expected method:password")),
    }
}

pub(crate) fn base64_rejection(failure: Base64Failure, field: &'static str) -> Rejection {
    match failure {
        Base64Failure::Truncated => Rejection::Truncated,
        Base64Failure::Invalid => Rejection::malformed(field, "not valid base64 text"),
    }
}
