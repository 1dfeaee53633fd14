// SPDX-License-Identifier: Apache-2.0

use omics_portal_model::{DatasetId, ValidationError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApiErrorKind {
    Transport,
    Status(u16),
    NotFound,
    Decode,
    Backend,
}

/// Failure at the REST boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transport, message)
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Backend, message)
    }

    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        if code == 404 {
            Self::new(ApiErrorKind::NotFound, message)
        } else {
            Self::new(ApiErrorKind::Status(code), message)
        }
    }

    /// Transport failures and 5xx/429 responses may succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ApiErrorKind::Transport => true,
            ApiErrorKind::Status(code) => code >= 500 || code == 429,
            ApiErrorKind::NotFound | ApiErrorKind::Decode | ApiErrorKind::Backend => false,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ApiErrorKind::Transport => write!(f, "transport error: {}", self.message),
            ApiErrorKind::Status(code) => write!(f, "backend returned {code}: {}", self.message),
            ApiErrorKind::NotFound => write!(f, "not found: {}", self.message),
            ApiErrorKind::Decode => write!(f, "response decode failed: {}", self.message),
            ApiErrorKind::Backend => write!(f, "backend reported failure: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        Self::decode(value.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PortalError {
    NoDatasetSelected,
    InvalidDataset(String),
    InvalidSelection(String),
    FetchFailure { target: String, message: String },
    InvalidViewportRange(String),
    UnavailableSignalTrack { dataset: DatasetId },
    Config(String),
}

impl PortalError {
    #[must_use]
    pub fn fetch(target: impl Into<String>, err: &ApiError) -> Self {
        Self::FetchFailure {
            target: target.into(),
            message: err.to_string(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoDatasetSelected => "no_dataset_selected",
            Self::InvalidDataset(_) => "invalid_dataset",
            Self::InvalidSelection(_) => "invalid_selection",
            Self::FetchFailure { .. } => "fetch_failure",
            Self::InvalidViewportRange(_) => "invalid_viewport_range",
            Self::UnavailableSignalTrack { .. } => "unavailable_signal_track",
            Self::Config(_) => "config",
        }
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDatasetSelected => f.write_str("no dataset selected"),
            Self::InvalidDataset(msg) => write!(f, "invalid dataset: {msg}"),
            Self::InvalidSelection(msg) => write!(f, "invalid selection: {msg}"),
            Self::FetchFailure { target, message } => {
                write!(f, "failed to fetch {target}: {message}")
            }
            Self::InvalidViewportRange(msg) => write!(f, "invalid viewport range: {msg}"),
            Self::UnavailableSignalTrack { dataset } => {
                write!(f, "no signal track data for dataset {dataset}")
            }
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for PortalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_status_class() {
        assert!(ApiError::transport("connection reset").is_retryable());
        assert!(ApiError::status(503, "unavailable").is_retryable());
        assert!(ApiError::status(429, "slow down").is_retryable());
        assert!(!ApiError::status(400, "bad gene").is_retryable());
        assert!(!ApiError::status(404, "gone").is_retryable());
        assert_eq!(ApiError::status(404, "gone").kind, ApiErrorKind::NotFound);
        assert!(!ApiError::decode("bad json").is_retryable());
    }

    #[test]
    fn fetch_failure_keeps_target_and_cause() {
        let err = PortalError::fetch("pd/gene/SNCA", &ApiError::status(500, "boom"));
        assert_eq!(err.code(), "fetch_failure");
        assert_eq!(
            err.to_string(),
            "failed to fetch pd/gene/SNCA: backend returned 500: boom"
        );
    }
}
