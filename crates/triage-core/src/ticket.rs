//! Raw support ticket as received from intake.

use ring::digest::{SHA256, digest};
use serde::{Deserialize, Serialize};

use crate::TriageError;

/// Immutable ticket input: one per request. Deserializing goes through
/// [`Ticket::new`], so the same intake checks apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTicket")]
pub struct Ticket {
    subject: String,
    body: String,
}

#[derive(Deserialize)]
struct RawTicket {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

impl TryFrom<RawTicket> for Ticket {
    type Error = TriageError;

    fn try_from(raw: RawTicket) -> Result<Self, Self::Error> {
        Ticket::new(raw.subject, raw.body)
    }
}

impl Ticket {
    /// Trim and accept a ticket. Rejects tickets with neither subject nor body.
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Result<Self, TriageError> {
        let subject = subject.into().trim().to_string();
        let body = body.into().trim().to_string();
        if subject.is_empty() && body.is_empty() {
            return Err(TriageError::inference(
                "empty ticket: both subject and body are empty",
            ));
        }
        Ok(Self { subject, body })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Hex SHA-256 of `subject || "||" || body`.
    ///
    /// Stable across runs; used as the ticket reference in logs and in the
    /// submitted task description.
    pub fn fingerprint(&self) -> String {
        let key = format!("{}||{}", self.subject, self.body);
        digest(&SHA256, key.as_bytes())
            .as_ref()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// First 12 hex characters of [`fingerprint`](Self::fingerprint).
    pub fn short_ref(&self) -> String {
        let mut fp = self.fingerprint();
        fp.truncate(12);
        fp
    }
}
