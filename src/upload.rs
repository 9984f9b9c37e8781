//! Retry loop around a resumable upload session.
//!
//! The session knows how to push the next chunk (or recover its position after
//! a failure); this module decides when to wait and when to give up.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::ApiError;

/// Outcome of pushing one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkProgress {
    /// The server committed everything up to `bytes_sent` and wants more.
    InProgress { bytes_sent: u64, total: u64 },
    /// The server accepted the final chunk and returned the created resource.
    Complete(Value),
}

pub trait UploadSession {
    /// Sends the next chunk. After an `Err`, the following call must pick up
    /// from whatever the server actually committed.
    fn next_chunk(&mut self) -> Result<ChunkProgress, ApiError>;

    /// Used for log lines only.
    fn describe(&self) -> String;
}

/// Seconds to wait before retry number `retry` (1-based).
pub fn backoff_delay(retry: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry))
}

/// Drives `session` to completion and returns the new video id.
///
/// Server errors in [`crate::error::RETRYABLE_STATUS_CODES`] are retried
/// without limit, sleeping `2^retry` seconds; the retry counter only grows
/// for the lifetime of this call. Anything else is returned as-is.
pub fn drive_upload<S>(session: &mut S, sleep: &mut dyn FnMut(Duration)) -> Result<String, ApiError>
where
    S: UploadSession + ?Sized,
{
    let mut retry: u32 = 0;
    loop {
        info!("Uploading file {}", session.describe());
        match session.next_chunk() {
            Ok(ChunkProgress::Complete(response)) => {
                return match response.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        info!("Video id '{id}' was successfully uploaded.");
                        Ok(id.to_string())
                    }
                    None => Err(ApiError::MissingVideoId(response)),
                };
            }
            Ok(ChunkProgress::InProgress { bytes_sent, total }) => {
                info!("Uploaded {bytes_sent} of {total} bytes");
            }
            Err(err) if err.is_retryable() => {
                retry += 1;
                let delay = backoff_delay(retry);
                warn!("A retriable error occurred: {err}");
                warn!("Sleeping for {} seconds and then retrying...", delay.as_secs());
                sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedSession {
        script: VecDeque<Result<ChunkProgress, ApiError>>,
        attempts: usize,
    }

    impl ScriptedSession {
        fn new(script: Vec<Result<ChunkProgress, ApiError>>) -> Self {
            Self {
                script: script.into(),
                attempts: 0,
            }
        }
    }

    impl UploadSession for ScriptedSession {
        fn next_chunk(&mut self) -> Result<ChunkProgress, ApiError> {
            self.attempts += 1;
            self.script
                .pop_front()
                .expect("session polled after the script ran out")
        }

        fn describe(&self) -> String {
            "scripted.mp4".to_string()
        }
    }

    fn status(code: u16) -> Result<ChunkProgress, ApiError> {
        Err(ApiError::Status {
            status: code,
            message: "backend error".into(),
        })
    }

    fn done(id: &str) -> Result<ChunkProgress, ApiError> {
        Ok(ChunkProgress::Complete(json!({ "id": id, "kind": "youtube#video" })))
    }

    #[test]
    fn retries_server_errors_with_growing_backoff() {
        let mut session = ScriptedSession::new(vec![status(503), status(500), done("vid-1")]);
        let mut slept = Vec::new();

        let id = drive_upload(&mut session, &mut |delay| slept.push(delay)).unwrap();

        assert_eq!(id, "vid-1");
        assert_eq!(session.attempts, 3);
        assert_eq!(slept, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[test]
    fn other_errors_fail_immediately_without_sleeping() {
        let mut session = ScriptedSession::new(vec![status(403)]);
        let mut slept = Vec::new();

        let err = drive_upload(&mut session, &mut |delay| slept.push(delay)).unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(session.attempts, 1);
        assert!(slept.is_empty());
    }

    #[test]
    fn completed_upload_without_id_is_fatal() {
        let mut session =
            ScriptedSession::new(vec![Ok(ChunkProgress::Complete(json!({"kind": "?"})))]);

        let err = drive_upload(&mut session, &mut |_| {}).unwrap_err();

        assert!(matches!(err, ApiError::MissingVideoId(_)));
    }

    #[test]
    fn chunks_continue_until_complete_and_retry_count_keeps_growing() {
        let mut session = ScriptedSession::new(vec![
            status(502),
            Ok(ChunkProgress::InProgress {
                bytes_sent: 262_144,
                total: 524_288,
            }),
            status(504),
            done("vid-2"),
        ]);
        let mut slept = Vec::new();

        let id = drive_upload(&mut session, &mut |delay| slept.push(delay)).unwrap();

        assert_eq!(id, "vid-2");
        assert_eq!(session.attempts, 4);
        assert_eq!(slept, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(200), Duration::from_secs(u64::MAX));
    }
}
