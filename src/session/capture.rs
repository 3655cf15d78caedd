//! Response-side mutation capture.
//!
//! Runs synchronously on the backend response headers, before they reach the
//! client. Performs no store I/O: it only records what the persister should do.

use axum::http::HeaderMap;

use crate::config::SessionConfig;
use crate::observability::logging::short_id;
use crate::session::id::SessionId;
use crate::session::lookup::{PendingMutation, SessionChange};

/// Strip the mutation header from `headers` and turn it into pending work.
///
/// The header is removed whether or not anything is recorded.
pub fn capture_mutation(
    settings: &SessionConfig,
    session: Option<&SessionId>,
    headers: &mut HeaderMap,
) -> Option<PendingMutation> {
    let signal = headers.remove(settings.mutation_header.as_str())?;

    let Some(id) = session else {
        tracing::debug!("Session mutation signalled without a session identifier, dropping");
        return None;
    };

    let value = match std::str::from_utf8(signal.as_bytes()) {
        Ok(v) => v.trim(),
        Err(_) => {
            tracing::warn!(session = short_id(id.as_str()), "Session mutation is not valid UTF-8, dropping");
            return None;
        }
    };

    Some(PendingMutation {
        id: id.clone(),
        change: SessionChange::from_signal(value),
    })
}
