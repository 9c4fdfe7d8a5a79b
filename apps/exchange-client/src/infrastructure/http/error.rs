//! Request pipeline error types.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::feed::TransportError;

/// Errors surfaced by the request pipeline and the exchange client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Human readable message from `detail`/`message`, or a generic one.
        message: String,
        /// Per-field validation messages, when the body carried any.
        field_errors: Option<FieldErrors>,
    },

    /// Authorization was rejected and could not be renewed. The stored
    /// credentials have been cleared; the user must sign in again.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// A success body did not match the expected shape.
    #[error("Unexpected response shape: {0}")]
    Decode(String),

    /// The request was rejected locally and never sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Whether the host application must force re-authentication.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// HTTP status of a failed request.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Field-level validation messages of a failed request.
    #[must_use]
    pub const fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::RequestFailed { field_errors, .. } => field_errors.as_ref(),
            _ => None,
        }
    }

    /// Build a `RequestFailed` from a status and the raw error body.
    #[must_use]
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let object = parsed.as_ref().and_then(serde_json::Value::as_object);

        let message = object
            .and_then(|o| {
                ["detail", "message"]
                    .iter()
                    .find_map(|key| o.get(*key).and_then(serde_json::Value::as_str))
            })
            .map_or_else(
                || format!("Request failed ({})", status.as_u16()),
                ToString::to_string,
            );

        Self::RequestFailed {
            status: status.as_u16(),
            message,
            field_errors: object.and_then(FieldErrors::from_body),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<ApiError> for TransportError {
    fn from(err: ApiError) -> Self {
        Self::Poll(err.to_string())
    }
}

/// Validation messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Collect every top-level key other than `detail`/`message` whose value
    /// is a string or an array of strings.
    #[must_use]
    pub fn from_body(body: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        let fields: BTreeMap<String, Vec<String>> = body
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "detail" | "message"))
            .filter_map(|(key, value)| {
                let messages: Vec<String> = match value {
                    serde_json::Value::String(s) => vec![s.clone()],
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(serde_json::Value::as_str)
                        .map(ToString::to_string)
                        .collect(),
                    _ => return None,
                };
                (!messages.is_empty()).then(|| (key.clone(), messages))
            })
            .collect();

        (!fields.is_empty()).then_some(Self(fields))
    }

    /// First message for a field.
    #[must_use]
    pub fn first(&self, field: &str) -> Option<&str> {
        self.0.get(field)?.first().map(String::as_str)
    }

    /// All messages for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Fields that carry messages.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether no field carries a message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_detail() {
        let err = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"detail":"Insufficient balance","message":"ignored"}"#,
        );
        assert_eq!(err.to_string(), "Insufficient balance");
        assert_eq!(err.status(), Some(400));
        assert!(err.field_errors().is_none());
    }

    #[test]
    fn message_falls_back_to_message_then_status() {
        let err = ApiError::from_response(StatusCode::CONFLICT, r#"{"message":"Duplicate"}"#);
        assert_eq!(err.to_string(), "Duplicate");

        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(err.to_string(), "Request failed (502)");
        assert!(err.field_errors().is_none());
    }

    #[test]
    fn collects_field_errors() {
        let err = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"price":["Price outside valid range","Second"],"quantity":"Must be positive","code":7}"#,
        );

        let fields = err.field_errors().unwrap();
        assert_eq!(fields.first("price"), Some("Price outside valid range"));
        assert_eq!(fields.get("price").map(<[String]>::len), Some(2));
        assert_eq!(fields.first("quantity"), Some("Must be positive"));
        assert_eq!(fields.first("code"), None);
        assert_eq!(fields.fields().collect::<Vec<_>>(), vec!["price", "quantity"]);
        assert_eq!(err.to_string(), "Request failed (400)");
    }

    #[test]
    fn session_expired_flag() {
        assert!(ApiError::SessionExpired.is_session_expired());
        assert!(!ApiError::Network("down".to_string()).is_session_expired());
    }

    #[test]
    fn converts_to_poll_transport_error() {
        let err: TransportError = ApiError::Network("refused".to_string()).into();
        assert_eq!(err, TransportError::Poll("Network error: refused".to_string()));
    }
}
