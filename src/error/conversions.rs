//! Conversions from third-party error types.

use super::types::RelayError;

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::TimeoutError(err.to_string())
        } else if err.is_connect() {
            RelayError::ConnectionError(err.to_string())
        } else if let Some(status) = err.status() {
            RelayError::ApiError {
                code: status.as_u16(),
                message: err.to_string(),
                details: None,
            }
        } else if err.is_decode() {
            RelayError::ParseError(err.to_string())
        } else {
            RelayError::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::JsonError(err.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::IoError(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for RelayError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        RelayError::ConfigurationError(format!("Invalid header value: {err}"))
    }
}

impl From<reqwest::header::InvalidHeaderName> for RelayError {
    fn from(err: reqwest::header::InvalidHeaderName) -> Self {
        RelayError::ConfigurationError(format!("Invalid header name: {err}"))
    }
}
