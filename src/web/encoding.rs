//! Header transport for cache snapshots.
//!
//! Header values must be visible ASCII, while holiday names are Korean. The
//! payload therefore travels as base64 of its JSON bytes in `X-Holiday-Data`,
//! and the diagnostics as JSON with every non-ASCII character `\u`-escaped in
//! `X-Cache-Info`. Both decode back to the original values.

use crate::cache::{CacheDiagnostics, CacheSnapshot};
use axum::http::header::ToStrError;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tracing::warn;

pub static HOLIDAY_DATA: HeaderName = HeaderName::from_static("x-holiday-data");
pub static CACHE_INFO: HeaderName = HeaderName::from_static("x-cache-info");

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("header value is not visible ASCII")]
    NotAscii(#[from] ToStrError),
    #[error("header value is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("header value is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("encoded value cannot be used as a header")]
    InvalidHeader(#[from] axum::http::header::InvalidHeaderValue),
}

/// `base64(JSON(payload))`.
pub fn encode_payload(payload: &Value) -> Result<HeaderValue, TransportError> {
    let json = serde_json::to_vec(payload)?;
    Ok(HeaderValue::try_from(STANDARD.encode(json))?)
}

pub fn decode_payload(value: &HeaderValue) -> Result<Value, TransportError> {
    let bytes = STANDARD.decode(value.to_str()?.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn encode_cache_info(diagnostics: &CacheDiagnostics) -> Result<HeaderValue, TransportError> {
    Ok(HeaderValue::try_from(ascii_json(diagnostics)?)?)
}

/// Diagnostics come back as plain JSON; consumers only read fields off it.
pub fn decode_cache_info(value: &HeaderValue) -> Result<Value, TransportError> {
    Ok(serde_json::from_str(value.to_str()?)?)
}

/// Serialize to JSON that contains only ASCII, escaping everything else as
/// UTF-16 `\uXXXX` units.
fn ascii_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    Ok(out)
}

/// Header pairs describing `snapshot`. The data header is omitted when there
/// is no payload; a value that fails to encode is logged and skipped.
pub fn snapshot_headers(snapshot: &CacheSnapshot) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = Vec::with_capacity(2);

    if let Some(payload) = &snapshot.payload {
        match encode_payload(payload) {
            Ok(value) => headers.push((HOLIDAY_DATA.clone(), value)),
            Err(e) => warn!(error = %e, "Failed to encode holiday payload header"),
        }
    }

    match encode_cache_info(&snapshot.diagnostics) {
        Ok(value) => headers.push((CACHE_INFO.clone(), value)),
        Err(e) => warn!(error = %e, "Failed to encode cache info header"),
    }

    headers
}

/// What a consumer reads back off the side channel.
#[derive(Debug, Default)]
pub struct DecodedSnapshot {
    pub payload: Option<Value>,
    pub cache_info: Option<Value>,
}

/// Decode both transport headers; a missing header decodes to `None`.
pub fn read_snapshot_headers(headers: &HeaderMap) -> Result<DecodedSnapshot, TransportError> {
    let payload = headers.get(&HOLIDAY_DATA).map(decode_payload).transpose()?;
    let cache_info = headers.get(&CACHE_INFO).map(decode_cache_info).transpose()?;
    Ok(DecodedSnapshot {
        payload,
        cache_info,
    })
}
