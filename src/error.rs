//! Errors produced while talking to the video platform.

use std::path::PathBuf;

use thiserror::Error;

/// Server-side failures that the upload loop waits out instead of surfacing.
pub const RETRYABLE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("YouTube API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error talking to YouTube: {0}")]
    Transport(String),

    #[error("Unexpected response from YouTube: {0}")]
    Decode(String),

    /// The upload finished but the platform did not hand back a video id.
    /// Retrying would risk a duplicate upload, so this always ends the run.
    #[error("The upload failed with an unexpected response: {0}")]
    MissingVideoId(serde_json::Value),

    #[error("Reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status()
            .is_some_and(|status| RETRYABLE_STATUS_CODES.contains(&status))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ApiError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ureq::Error> for ApiError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => ApiError::Status {
                status,
                message: response
                    .into_string()
                    .unwrap_or_else(|_| "unknown error".to_string()),
            },
            ureq::Error::Transport(transport) => ApiError::Transport(transport.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            message: "boom".into(),
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        for code in RETRYABLE_STATUS_CODES {
            assert!(status(code).is_retryable(), "{code} should be retryable");
        }
    }

    #[test]
    fn other_failures_are_not_retryable() {
        assert!(!status(400).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(501).is_retryable());
        assert!(!ApiError::Transport("reset".into()).is_retryable());
        assert!(!ApiError::MissingVideoId(serde_json::json!({})).is_retryable());
    }

    #[test]
    fn missing_video_id_message_includes_response() {
        let err = ApiError::MissingVideoId(serde_json::json!({"kind": "youtube#video"}));
        assert!(err.to_string().contains("youtube#video"));
    }
}
