//! Classification of raw failures into user-presentable errors.

use docpipe_shared::{ErrorKind, RemoteFailure};

const NETWORK_MESSAGE: &str =
    "Unable to reach the processing service; check the network connection or server status";
const UNKNOWN_MESSAGE: &str = "An unexpected error occurred during processing; please retry";

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    /// Stable, user-facing text for this kind of failure.
    pub user_message: String,
}

/// Stateless classifier. The raw cause is never altered; callers keep it
/// alongside the classification for logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter;

impl ErrorReporter {
    pub fn classify(&self, failure: &RemoteFailure) -> Classified {
        match failure {
            RemoteFailure::Transport(_) => Classified {
                kind: ErrorKind::NetworkUnreachable,
                user_message: NETWORK_MESSAGE.to_string(),
            },
            RemoteFailure::Status {
                code,
                reason,
                detail,
            } => {
                let mut user_message =
                    format!("The processing service rejected the request (HTTP {code} {reason})");
                if let Some(detail) = detail {
                    user_message.push_str(": ");
                    user_message.push_str(detail);
                }
                Classified {
                    kind: ErrorKind::HttpStatus,
                    user_message,
                }
            }
            RemoteFailure::Decode(_) => Classified {
                kind: ErrorKind::MalformedResponse,
                user_message: "The processing service returned a response that could not be read"
                    .to_string(),
            },
            RemoteFailure::Other(_) => self.unexpected(),
        }
    }

    /// Classification for failures caught outside the stage call path.
    pub fn unexpected(&self) -> Classified {
        Classified {
            kind: ErrorKind::Unknown,
            user_message: UNKNOWN_MESSAGE.to_string(),
        }
    }
}
