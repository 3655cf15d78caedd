//! Shared session pipeline types.

use crate::session::id::SessionId;
use crate::store::StoreError;

/// Outcome of resolving a request's session, consumed by every phase.
#[derive(Debug)]
pub enum SessionLookup {
    /// A valid identifier with a live record.
    Resolved { id: SessionId, payload: String },
    /// No identifier, a malformed one, or no record: an anonymous request.
    Absent,
    /// The store could not be consulted; proceed without session context.
    Degraded(StoreError),
}

impl SessionLookup {
    pub fn outcome(&self) -> &'static str {
        match self {
            SessionLookup::Resolved { .. } => "resolved",
            SessionLookup::Absent => "absent",
            SessionLookup::Degraded(_) => "degraded",
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            SessionLookup::Resolved { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// What the backend asked to happen to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Replace the payload and re-arm the full TTL.
    Write(String),
    /// Terminate the session now.
    Expire,
}

impl SessionChange {
    /// Interpret a mutation header value. `{}` and `null` terminate the session.
    pub fn from_signal(value: &str) -> Self {
        match value {
            "{}" | "null" => SessionChange::Expire,
            other => SessionChange::Write(other.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionChange::Write(_) => "write",
            SessionChange::Expire => "expire",
        }
    }
}

/// Work captured from a response, persisted after the response is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub id: SessionId,
    pub change: SessionChange,
}

/// Strip `\r`, `\n` and `\t` so a payload is safe to forward in a header or log line.
pub fn sanitize_payload(payload: &str) -> String {
    payload
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .collect()
}
