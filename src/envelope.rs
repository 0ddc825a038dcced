//! Response materialization.
//!
//! Turns a [`RawResponse`] into a validated, introspectable
//! [`ResponseEnvelope`], or a classified error for non-success responses.
//!
//! Decision procedure:
//!
//! 1. Sniff `Content-Type` for `application/json` and attempt a single JSON
//!    parse of the body. Parse failure downgrades to plain text, never to an
//!    error.
//! 2. On success or redirect, a configured schema is applied to the parsed
//!    value; a schema failure is a hard [`Error::SchemaValidation`], never
//!    silently treated as non-JSON.
//! 3. On a non-success, non-redirect status the body is still fully
//!    materialized, then [`Error::HttpResponse`] is raised carrying the
//!    populated envelope so the error message can extract structured fields.
//!
//! Invariant: `is_json == true` implies `data_string` parses as JSON, and
//! `data` is present only if `is_json` and (no schema configured, or schema
//! validation succeeded).

use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::RawResponse;
use crate::validation::SchemaValidator;

/// Materialized, validated representation of a transport response.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// `true` for 2xx statuses.
    pub ok: bool,
    /// HTTP status code.
    pub status: StatusCode,
    /// Canonical reason phrase for the status, empty when unknown.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed (and, when a schema is configured, validated) JSON body.
    pub data: Option<Value>,
    /// Whether the body was recognized and parsed as JSON.
    pub is_json: bool,
    /// The body as text, regardless of JSON detection.
    pub data_string: String,
    /// The raw transport response the envelope was built from.
    pub raw: RawResponse,
}

impl ResponseEnvelope {
    /// Best-effort error message for a failure response.
    ///
    /// Prefers a structured `error.{type,code,message}` object, then a string
    /// `error` field, then an `errorMessages` array joined with `"; "`, then
    /// the raw body text. Always suffixed with
    /// `HTTP Error Response: <status> <statusText>`.
    pub fn error_message(&self) -> String {
        let suffix = format!(
            "HTTP Error Response: {} {}",
            self.status.as_u16(),
            self.status_text
        );

        let extracted = self
            .data
            .as_ref()
            .and_then(extract_error_fields)
            .or_else(|| {
                let trimmed = self.data_string.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            });

        match extracted {
            Some(message) => format!("{message}; {suffix}"),
            None => suffix,
        }
    }

    /// Parses a `Retry-After` header, if present. Accepts both forms: whole
    /// seconds, or an HTTP-date that is converted to a remaining wait
    /// (already-past dates yield a zero wait).
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let wait = date.signed_duration_since(chrono::Utc::now());
        Some(wait.to_std().unwrap_or(Duration::ZERO))
    }
}

fn extract_error_fields(data: &Value) -> Option<String> {
    if let Some(error) = data.get("error") {
        if error.is_object() {
            let mut head = String::new();
            if let Some(kind) = error.get("type").and_then(Value::as_str) {
                head.push_str(kind);
            }
            if let Some(code) = error.get("code") {
                let code = match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !head.is_empty() {
                    head.push(' ');
                }
                head.push_str(&code);
            }
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                if head.is_empty() {
                    head.push_str(message);
                } else {
                    head.push_str(": ");
                    head.push_str(message);
                }
            }
            if !head.is_empty() {
                return Some(head);
            }
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }

    if let Some(messages) = data.get("errorMessages").and_then(Value::as_array) {
        let joined = messages
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }

    None
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Materializes a raw transport response into an envelope.
///
/// Pure over its input: calling it twice on clones of the same raw response
/// yields identical envelopes.
pub fn materialize(
    raw: RawResponse,
    schema: Option<&dyn SchemaValidator>,
) -> Result<ResponseEnvelope> {
    let status = raw.status;
    let ok = status.is_success();
    let redirected = status.is_redirection();

    let data_string = String::from_utf8_lossy(&raw.body).into_owned();

    let mut is_json = false;
    let mut data = None;

    if is_json_content_type(&raw.headers) {
        match serde_json::from_str::<Value>(&data_string) {
            Ok(parsed) => {
                is_json = true;
                match schema {
                    // A configured schema gates `data` on a successful
                    // response; failure is terminal, not a downgrade.
                    Some(schema) if ok || redirected => match schema.validate(&parsed) {
                        Ok(validated) => data = Some(validated),
                        Err(violations) => {
                            debug!(
                                status = status.as_u16(),
                                violations = violations.len(),
                                "schema validation failed"
                            );
                            return Err(Error::schema_validation(violations));
                        }
                    },
                    _ => data = Some(parsed),
                }
            }
            Err(_) => {
                // Content-Type lied; treat the body as plain text.
                debug!(status = status.as_u16(), "body is not valid JSON despite content type");
            }
        }
    }

    let envelope = ResponseEnvelope {
        ok,
        status,
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        headers: raw.headers.clone(),
        data,
        is_json,
        data_string,
        raw,
    };

    if !ok && !redirected {
        return Err(Error::http_response(envelope));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn raw(status: StatusCode, content_type: Option<&str>, body: &str) -> RawResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        RawResponse {
            status,
            headers,
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    #[test]
    fn test_json_success_envelope() {
        let raw = raw(
            StatusCode::OK,
            Some("application/json"),
            r#"{"id":"1","name":"Test User","age":25}"#,
        );
        let envelope = materialize(raw, None).unwrap();
        assert!(envelope.ok);
        assert!(envelope.is_json);
        assert_eq!(
            envelope.data,
            Some(json!({"id": "1", "name": "Test User", "age": 25}))
        );
        assert_eq!(envelope.status, StatusCode::OK);
    }

    #[test]
    fn test_charset_suffix_still_sniffs_json() {
        let raw = raw(
            StatusCode::OK,
            Some("application/json; charset=utf-8"),
            r#"{"a":1}"#,
        );
        let envelope = materialize(raw, None).unwrap();
        assert!(envelope.is_json);
    }

    #[test]
    fn test_plain_text_body() {
        let raw = raw(StatusCode::OK, Some("text/plain"), "hello");
        let envelope = materialize(raw, None).unwrap();
        assert!(!envelope.is_json);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.data_string, "hello");
    }

    #[test]
    fn test_invalid_json_downgrades_to_text() {
        let raw = raw(StatusCode::OK, Some("application/json"), "not json {");
        let envelope = materialize(raw, None).unwrap();
        assert!(!envelope.is_json);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.data_string, "not json {");
    }

    #[test]
    fn test_schema_failure_is_hard_error() {
        let validator = |_: &Value| -> std::result::Result<Value, Vec<String>> {
            Err(vec!["age: expected number".to_string()])
        };
        let raw = raw(StatusCode::OK, Some("application/json"), r#"{"age":"x"}"#);
        let result = materialize(raw, Some(&validator));
        match result {
            Err(Error::SchemaValidation { violations }) => {
                assert_eq!(violations, vec!["age: expected number".to_string()]);
            }
            other => panic!("expected SchemaValidation, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_replaces_data_on_success() {
        let validator = |_: &Value| -> std::result::Result<Value, Vec<String>> {
            Ok(json!({"coerced": true}))
        };
        let raw = raw(StatusCode::OK, Some("application/json"), r#"{"a":1}"#);
        let envelope = materialize(raw, Some(&validator)).unwrap();
        assert_eq!(envelope.data, Some(json!({"coerced": true})));
    }

    #[test]
    fn test_schema_not_applied_to_failure_body() {
        // Validation is consumed only for successful responses; the failure
        // path must still materialize and classify.
        let validator = |_: &Value| -> std::result::Result<Value, Vec<String>> {
            Err(vec!["should not run".to_string()])
        };
        let raw = raw(
            StatusCode::BAD_REQUEST,
            Some("application/json"),
            r#"{"error":"boom"}"#,
        );
        let result = materialize(raw, Some(&validator));
        match result {
            Err(Error::HttpResponse(envelope)) => {
                assert!(envelope.is_json);
                assert_eq!(envelope.data, Some(json!({"error": "boom"})));
            }
            other => panic!("expected HttpResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_raises_http_response_with_envelope() {
        let raw = raw(StatusCode::INTERNAL_SERVER_ERROR, Some("text/plain"), "oops");
        let result = materialize(raw, None);
        match result {
            Err(Error::HttpResponse(envelope)) => {
                assert!(!envelope.ok);
                assert_eq!(envelope.status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(envelope.data_string, "oops");
            }
            other => panic!("expected HttpResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_redirect_is_not_an_error() {
        let raw = raw(StatusCode::FOUND, None, "");
        let envelope = materialize(raw, None).unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.status, StatusCode::FOUND);
    }

    #[test]
    fn test_error_message_structured_fields() {
        let raw = raw(
            StatusCode::BAD_REQUEST,
            Some("application/json"),
            r#"{"error":{"type":"ValidationError","code":"E100","message":"bad input"}}"#,
        );
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        let message = err.to_string();
        assert!(message.contains("ValidationError E100: bad input"));
        assert!(message.contains("HTTP Error Response: 400 Bad Request"));
    }

    #[test]
    fn test_error_message_string_error_field() {
        let raw = raw(
            StatusCode::BAD_REQUEST,
            Some("application/json"),
            r#"{"error":"plain failure"}"#,
        );
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        assert!(err.to_string().contains("plain failure; HTTP Error Response: 400"));
    }

    #[test]
    fn test_error_message_error_messages_array() {
        let raw = raw(
            StatusCode::UNPROCESSABLE_ENTITY,
            Some("application/json"),
            r#"{"errorMessages":["first","second"]}"#,
        );
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        assert!(err.to_string().contains("first; second"));
    }

    #[test]
    fn test_error_message_raw_body_fallback() {
        let raw = raw(StatusCode::BAD_GATEWAY, Some("text/html"), "<h1>gateway</h1>");
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        let message = err.to_string();
        assert!(message.contains("<h1>gateway</h1>"));
        assert!(message.contains("HTTP Error Response: 502 Bad Gateway"));
    }

    #[test]
    fn test_error_message_empty_body() {
        let raw = raw(StatusCode::NOT_FOUND, None, "");
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        assert_eq!(err.to_string(), "HTTP Error Response: 404 Not Found");
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let raw = RawResponse {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers,
            body: Bytes::new(),
        };
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&future.to_rfc2822()).unwrap(),
        );
        let raw = RawResponse {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::new(),
        };
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        let wait = err.retry_after().unwrap();
        assert!(wait <= Duration::from_secs(30));
        assert!(wait >= Duration::from_secs(25));

        // A date in the past clamps to zero rather than failing.
        let past = chrono::Utc::now() - chrono::Duration::seconds(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&past.to_rfc2822()).unwrap(),
        );
        let raw = RawResponse {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::new(),
        };
        let Err(err) = materialize(raw, None) else {
            panic!("expected error");
        };
        assert_eq!(err.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn test_materializer_is_idempotent() {
        let raw = raw(
            StatusCode::OK,
            Some("application/json"),
            r#"{"id":"1","name":"Test User","age":25}"#,
        );
        let first = materialize(raw.clone(), None).unwrap();
        let second = materialize(raw, None).unwrap();
        assert_eq!(first.ok, second.ok);
        assert_eq!(first.status, second.status);
        assert_eq!(first.is_json, second.is_json);
        assert_eq!(first.data, second.data);
        assert_eq!(first.data_string, second.data_string);
    }
}
