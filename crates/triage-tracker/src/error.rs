use thiserror::Error;
use triage_core::TriageError;

/// Raw transport or protocol fault from the tracker API.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    /// The request certainly had no effect: it never connected, or the
    /// service refused it before processing (rate limit, unavailable).
    /// 502 and 504 come from a gateway that may already have forwarded the
    /// request, so they do not qualify.
    pub fn not_applied(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_builder(),
            Self::Server { status, .. } => matches!(status, 429 | 503),
            Self::Json(_) => false,
        }
    }

    /// Network-class failure worth retrying for idempotent requests.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) => false,
        }
    }

    /// Map into the triage taxonomy. 4xx (except 429) is a rejection of the
    /// payload; anything else is unavailability.
    pub fn into_triage(self, operation: &str) -> TriageError {
        match self {
            Self::Server { status, body } if (400..500).contains(&status) && status != 429 => {
                TriageError::SubmissionRejected { status, body }
            }
            other => TriageError::SubmissionUnavailable {
                possibly_created: !other.not_applied(),
                reason: format!("{operation}: {other}"),
            },
        }
    }
}
