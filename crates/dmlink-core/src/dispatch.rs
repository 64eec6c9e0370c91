// ── Event stream dispatcher ──
//
// One background task per session reads the event stream and hands each
// message to the callbacks registered for its tag, strictly in receipt
// order. Callbacks run on this task, never on the registrant's.

use std::sync::Arc;

use chrono::Utc;
use dmlink_api::{EventPayload, StreamMessage};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::StateCache;
use crate::event::Event;
use crate::path::DatamodelPath;
use crate::registry::SubscriptionRegistry;
use crate::session::ConnectionState;

pub(crate) struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    cache: Option<Arc<StateCache>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        cache: Option<Arc<StateCache>>,
        state: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            cache,
            state,
            cancel,
        }
    }

    /// Spawn the read loop over `stream`.
    pub(crate) fn spawn(self, stream: dmlink_api::EventStream) -> JoinHandle<()> {
        tokio::spawn(self.run(stream))
    }

    async fn run(self, mut stream: dmlink_api::EventStream) {
        info!("event dispatcher started");

        let reason = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("event dispatcher cancelled");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => self.dispatch(message).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream failed");
                        break e.to_string();
                    }
                    None => break "event stream ended".to_owned(),
                },
            }
        };

        // No resubscribe: the caller decides what happens next.
        self.registry.invalidate(&reason).await;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        info!(reason = %reason, "event stream disconnected");
        let _ = self.state.send(ConnectionState::Disconnected { reason });
    }

    async fn dispatch(&self, message: StreamMessage) {
        let Some((tag, callbacks)) = self.registry.callbacks_for(&message.tag).await else {
            debug!(tag = %message.tag, "event for unknown tag dropped");
            return;
        };

        let diff = match (&self.cache, &message.payload) {
            (Some(cache), EventPayload::Modified { state }) => {
                cache.apply(tag.rules(), tag.path(), state)
            }
            (Some(cache), EventPayload::Deleted { paths }) => {
                for raw in paths {
                    if let Ok(path) = raw.parse::<DatamodelPath>() {
                        cache.forget_under(tag.rules(), &path);
                    }
                }
                None
            }
            _ => None,
        };

        let retire = matches!(message.payload, EventPayload::Deleted { .. });
        let event = Event {
            tag: message.tag,
            rules: tag.rules().to_owned(),
            path: tag.path().clone(),
            kind: tag.kind(),
            payload: message.payload,
            diff,
            received_at: Utc::now(),
        };

        for callback in callbacks {
            if self.cancel.is_cancelled() {
                return;
            }
            callback(&event);
        }

        // A deleted object never fires again.
        if retire {
            self.registry.retire(&event.tag).await;
        }
    }
}
