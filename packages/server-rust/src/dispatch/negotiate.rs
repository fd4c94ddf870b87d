//! Content negotiation: choose the wire format from the request media type.

use http::HeaderValue;
use protowire_core::WireFormat;

/// Why a request's media type was rejected. Always answered with 415.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiateError {
    #[error("missing Content-Type")]
    Missing,
    #[error("malformed media type {0:?}")]
    Malformed(String),
    #[error("unsupported media type {0:?}")]
    Unsupported(String),
    #[error("JSON is not enabled for this endpoint")]
    JsonDisabled,
}

/// Picks the wire format for a request.
///
/// `json_enabled` is false when the endpoint has no JSON codec configured,
/// in which case `application/json` is rejected like any other unsupported
/// type.
///
/// # Errors
///
/// Returns [`NegotiateError`] when the header is absent, unparsable, or names
/// a media type this endpoint does not speak.
pub fn negotiate(
    content_type: Option<&HeaderValue>,
    json_enabled: bool,
) -> Result<WireFormat, NegotiateError> {
    let raw = content_type.ok_or(NegotiateError::Missing)?;
    let raw = raw
        .to_str()
        .map_err(|_| NegotiateError::Malformed(String::from_utf8_lossy(raw.as_bytes()).into()))?;
    let essence = parse_media_type(raw).ok_or_else(|| NegotiateError::Malformed(raw.to_owned()))?;

    match essence.as_str() {
        "application/json" if json_enabled => Ok(WireFormat::Json),
        "application/json" => Err(NegotiateError::JsonDisabled),
        "application/octet-stream" | "application/x-protobuf" => Ok(WireFormat::Binary),
        _ => Err(NegotiateError::Unsupported(essence)),
    }
}

/// Parses `type/subtype *( ";" name "=" value )` and returns the lowercased
/// `type/subtype`. Parameters are validated but otherwise ignored.
fn parse_media_type(raw: &str) -> Option<String> {
    let mut sections = raw.split(';');
    let essence = sections.next()?.trim();

    let (ty, subtype) = essence.split_once('/')?;
    if !is_token(ty) || !is_token(subtype) {
        return None;
    }

    for param in sections {
        let param = param.trim();
        if param.is_empty() {
            // Tolerate a trailing `;`.
            continue;
        }
        let (name, value) = param.split_once('=')?;
        if !is_token(name.trim_end()) || !is_param_value(value.trim_start()) {
            return None;
        }
    }

    Some(essence.to_ascii_lowercase())
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_param_value(s: &str) -> bool {
    match s.strip_prefix('"') {
        Some(rest) => !rest.is_empty() && rest.ends_with('"') && !rest[..rest.len() - 1].contains('"'),
        None => is_token(s),
    }
}
