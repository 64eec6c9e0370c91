// ── Event streams ──
//
// `Stream` adapter over one subscription, for consumers that would rather
// use `StreamExt` than a callback.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::CoreError;
use crate::event::Event;
use crate::node::subscribe_at;
use crate::path::DatamodelPath;
use crate::session::{Session, Subscription};
use crate::tag::EventTarget;

/// Events of one subscription, in delivery order.
///
/// The stream ends when the subscription goes away (unsubscribed,
/// released, or invalidated by a stream loss).
pub struct EventStream {
    inner: UnboundedReceiverStream<Arc<Event>>,
    subscription: Subscription,
}

impl EventStream {
    pub(crate) async fn open(
        session: &Session,
        rules: &str,
        path: &DatamodelPath,
        target: EventTarget,
    ) -> Result<Self, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = subscribe_at(session, rules, path, target, move |event| {
            let _ = tx.send(Arc::new(event.clone()));
        })
        .await?;
        Ok(Self {
            inner: UnboundedReceiverStream::new(rx),
            subscription,
        })
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Unsubscribe and end the stream.
    pub async fn close(self) -> Result<(), CoreError> {
        self.subscription.unsubscribe().await
    }
}

impl Stream for EventStream {
    type Item = Arc<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
