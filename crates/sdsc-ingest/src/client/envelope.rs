//! Response envelope decoding and failure classification
//!
//! Every sdsc2 list endpoint answers with the same wrapper:
//!
//! ```json
//! {
//!   "header": { "resultCode": "00", "resultMsg": "NORMAL SERVICE" },
//!   "body": { "items": [...], "totalCount": 240, "numOfRows": 100, "pageNo": 1 }
//! }
//! ```
//!
//! Counts arrive as numbers or as strings depending on the endpoint. Gateway
//! errors (bad key, quota) come back as XML or plain text instead.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use sdsc_common::types::{Cursor, PageRequest, PageResult, RawRecord};

use crate::error::FetchError;

const RESULT_OK: &str = "00";
const RESULT_NO_DATA: &str = "03";

/// Result codes worth retrying: upstream application error, HTTP error,
/// timeout, request quota exceeded
const TRANSIENT_RESULT_CODES: &[&str] = &["01", "04", "05", "22"];

const QUOTA_MARKERS: &[&str] = &["LIMITED_NUMBER_OF_SERVICE_REQUESTS", "API rate limit exceeded"];
const KEY_MARKERS: &[&str] = &[
    "SERVICE_KEY_IS_NOT_REGISTERED",
    "SERVICE_ACCESS_DENIED",
    "DEADLINE_HAS_EXPIRED",
    "UNREGISTERED_IP",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    header: Header,
    #[serde(default)]
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(rename = "resultCode", default)]
    result_code: Option<Value>,
    #[serde(rename = "resultMsg", default)]
    result_msg: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    items: Option<Value>,
    #[serde(rename = "totalCount", default)]
    total_count: Option<Value>,
    #[serde(rename = "numOfRows", default)]
    num_of_rows: Option<Value>,
    #[serde(rename = "pageNo", default)]
    page_no: Option<Value>,
}

/// Map a non-success HTTP status to a fetch error
pub fn classify_status(request: &PageRequest, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let reason = format!("HTTP {}", status);
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();

    Some(if transient {
        FetchError::transient(request, reason)
    } else {
        FetchError::permanent(request, reason)
    })
}

/// Map a transport-level reqwest failure to a fetch error
pub fn classify_transport(request: &PageRequest, error: &reqwest::Error) -> FetchError {
    let kind = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_decode() || error.is_body() {
        "failed to read response body"
    } else {
        "transport error"
    };
    FetchError::transient(request, format!("{}: {}", kind, error))
}

/// Decode a response body into a page.
///
/// `page_size` is the effective `numOfRows` that was sent.
pub fn decode_page(request: &PageRequest, page_size: u32, body: &str) -> Result<PageResult, FetchError> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return Err(classify_non_json(request, body, &e)),
    };

    let code = envelope
        .header
        .result_code
        .as_ref()
        .and_then(value_as_string)
        .unwrap_or_else(|| RESULT_OK.to_string());
    let message = envelope.header.result_msg.unwrap_or_default();

    if code == RESULT_NO_DATA {
        return Ok(PageResult::default());
    }
    if code != RESULT_OK {
        let reason = format!("API result {} ({})", code, message);
        return Err(if TRANSIENT_RESULT_CODES.contains(&code.as_str()) {
            FetchError::transient(request, reason)
        } else {
            FetchError::permanent(request, reason)
        });
    }

    let body = envelope.body.unwrap_or_default();
    let records = decode_items(request, body.items)?;
    let total_count = body.total_count.as_ref().and_then(value_as_u64);
    check_page_no(request, body.page_no.as_ref())?;
    let num_of_rows = body
        .num_of_rows
        .as_ref()
        .and_then(value_as_u64)
        .filter(|n| *n > 0)
        .unwrap_or_else(|| u64::from(page_size));

    let next_cursor = next_cursor(request.cursor, page_size, records.len(), num_of_rows, total_count);

    Ok(PageResult {
        records,
        next_cursor,
        total_count,
    })
}

/// Pagination end detection.
///
/// An empty page always ends the stream. With a reported total the stream
/// ends once everything up to this page covers it; without one, a short
/// page ends it. Position comes from the requested cursor, never from the
/// echoed `pageNo`.
pub fn next_cursor(
    cursor: Cursor,
    page_size: u32,
    returned: usize,
    num_of_rows: u64,
    total_count: Option<u64>,
) -> Option<Cursor> {
    if returned == 0 {
        return None;
    }

    let done = match total_count {
        Some(total) => {
            let seen = u64::from(cursor.page().saturating_sub(1))
                .saturating_mul(num_of_rows)
                .saturating_add(returned as u64);
            seen >= total
        },
        None => (returned as u64) < u64::from(page_size),
    };

    if done {
        None
    } else {
        cursor.next()
    }
}

/// The echoed `pageNo`, when present, must be the page that was asked for
fn check_page_no(request: &PageRequest, page_no: Option<&Value>) -> Result<(), FetchError> {
    let Some(value) = page_no else {
        return Ok(());
    };
    let requested = request.cursor.page();
    match value_as_u64(value) {
        Some(echoed) if echoed == u64::from(requested) => Ok(()),
        Some(echoed) => Err(FetchError::permanent(
            request,
            format!("schema mismatch: pageNo {} does not match requested page {}", echoed, requested),
        )),
        None if value.is_null() => Ok(()),
        None => Err(FetchError::permanent(
            request,
            format!("schema mismatch: pageNo {} is not a page number", value),
        )),
    }
}

fn decode_items(request: &PageRequest, items: Option<Value>) -> Result<Vec<RawRecord>, FetchError> {
    let array = match items {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        // Some endpoints wrap the list: {"items": {"item": [...]}}
        Some(Value::Object(mut wrapper)) if wrapper.len() == 1 && wrapper.contains_key("item") => {
            match wrapper.remove("item") {
                Some(Value::Array(array)) => array,
                Some(single @ Value::Object(_)) => vec![single],
                _ => return Err(FetchError::permanent(request, "schema mismatch: 'items.item' is not a list")),
            }
        },
        Some(Value::Array(array)) => array,
        Some(other) => {
            return Err(FetchError::permanent(
                request,
                format!("schema mismatch: 'items' is {}", json_kind(&other)),
            ))
        },
    };

    array
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            RawRecord::try_from(value).map_err(|other| {
                FetchError::permanent(
                    request,
                    format!("schema mismatch: item {} is {}", index, json_kind(&other)),
                )
            })
        })
        .collect()
}

fn classify_non_json(request: &PageRequest, body: &str, error: &serde_json::Error) -> FetchError {
    if QUOTA_MARKERS.iter().any(|m| body.contains(m)) {
        return FetchError::transient(request, "request quota exceeded");
    }
    if KEY_MARKERS.iter().any(|m| body.contains(m)) {
        return FetchError::permanent(request, "service key rejected by gateway");
    }
    let preview: String = body.chars().take(120).collect();
    FetchError::permanent(
        request,
        format!("schema mismatch: response is not a JSON envelope ({}): {}", error, preview),
    )
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(format!("{:02}", n.as_u64()?)),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
