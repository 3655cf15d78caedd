//! Post-response mutation persistence.
//!
//! # Responsibilities
//! - Write captured payloads with the full TTL, or expire terminated sessions
//! - Run only after the response body has been handed off to the client
//!
//! # Design Decisions
//! - Failures are logged and dropped: no retry, nothing surfaced to the client
//! - Pending work lives in a per-response guard, never in shared state
//! - Background writes are tracked so shutdown can wait for them

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio_util::task::TaskTracker;

use crate::config::SessionConfig;
use crate::observability::{logging::short_id, metrics};
use crate::session::lookup::{PendingMutation, SessionChange};
use crate::store::{StoreClient, StoreResult};

#[derive(Clone)]
pub struct MutationPersister {
    store: StoreClient,
    settings: Arc<SessionConfig>,
    tasks: TaskTracker,
}

impl MutationPersister {
    pub fn new(store: StoreClient, settings: Arc<SessionConfig>) -> Self {
        Self {
            store,
            settings,
            tasks: TaskTracker::new(),
        }
    }

    /// Apply one mutation to the store.
    pub async fn persist(&self, mutation: &PendingMutation) -> StoreResult<()> {
        let key = self.settings.key_for(mutation.id.as_str());
        let kind = mutation.change.kind();

        let result = match &mutation.change {
            SessionChange::Write(payload) => {
                self.store
                    .set_with_ttl(&key, payload, self.settings.ttl_secs)
                    .await
            }
            SessionChange::Expire => self.store.expire_now(&key).await,
        };

        match &result {
            Ok(()) => {
                metrics::record_session_mutation(kind, "ok");
                tracing::debug!(session = short_id(mutation.id.as_str()), kind, "Session persisted");
            }
            Err(e) => {
                metrics::record_session_mutation(kind, "error");
                tracing::warn!(
                    session = short_id(mutation.id.as_str()),
                    kind,
                    error = %e,
                    "Dropping session mutation"
                );
            }
        }
        result
    }

    /// Persist every mutation in `hooks` on a background task.
    pub fn spawn(&self, hooks: PostResponse) {
        if hooks.pending.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(count = hooks.pending.len(), "No runtime to persist session mutations");
            return;
        };
        let persister = self.clone();
        self.tasks.spawn_on(
            async move {
                for mutation in &hooks.pending {
                    let _ = persister.persist(mutation).await;
                }
            },
            &runtime,
        );
    }

    /// Wait up to `limit` for background writes still in flight.
    ///
    /// Writes spawned after this call are still run and tracked.
    pub async fn drain(&self, limit: Duration) {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending == 0 {
            return;
        }
        tracing::info!(pending, "Waiting for session writes to finish");
        if tokio::time::timeout(limit, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                pending = self.tasks.len(),
                "Session writes still running at shutdown, abandoning them"
            );
        }
    }
}

/// Work deferred until a response has been delivered.
#[derive(Debug, Default)]
pub struct PostResponse {
    pending: Vec<PendingMutation>,
}

impl PostResponse {
    pub fn push(&mut self, mutation: PendingMutation) {
        self.pending.push(mutation);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Response body that hands its [`PostResponse`] work to the persister once
/// the body has been fully sent or abandoned.
pub struct PersistOnComplete {
    inner: Body,
    hooks: Option<(MutationPersister, PostResponse)>,
}

impl PersistOnComplete {
    pub fn new(inner: Body, persister: MutationPersister, hooks: PostResponse) -> Self {
        Self {
            inner,
            hooks: Some((persister, hooks)),
        }
    }

    fn fire(&mut self) {
        if let Some((persister, hooks)) = self.hooks.take() {
            persister.spawn(hooks);
        }
    }
}

impl HttpBody for PersistOnComplete {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            this.fire();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for PersistOnComplete {
    fn drop(&mut self) {
        self.fire();
    }
}
