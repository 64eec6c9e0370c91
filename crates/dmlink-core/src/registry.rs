// ── Subscription registry ──
//
// Maps each event tag to exactly one remote subscription plus the ordered
// list of local callbacks attached to it. The table lock is held across
// the remote subscribe/unsubscribe round trip, so concurrent subscribers
// to the same tag can never create a second remote subscription.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dmlink_api::{DatamodelRpc, EventKind, SubscriptionResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::call::bounded;
use crate::error::CoreError;
use crate::event::Event;
use crate::path::DatamodelPath;
use crate::tag::EventTag;

/// A local event callback. Runs on the session's dispatcher task.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle for one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    tag: EventTag,
    callbacks: Vec<(SubscriptionId, Callback)>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Entry>,
    index: HashMap<SubscriptionId, String>,
    /// Set once the event stream is lost; no new subscriptions after that.
    invalidated: Option<String>,
}

/// Session-owned table of live subscriptions.
pub struct SubscriptionRegistry {
    rpc: Arc<dyn DatamodelRpc>,
    timeout: Duration,
    table: Mutex<Table>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(rpc: Arc<dyn DatamodelRpc>, timeout: Duration) -> Self {
        Self {
            rpc,
            timeout,
            table: Mutex::new(Table::default()),
        }
    }

    /// Attach `callback` to `tag`, creating the remote subscription if this
    /// is the first callback for it.
    pub async fn subscribe(
        &self,
        tag: EventTag,
        callback: Callback,
    ) -> Result<SubscriptionId, CoreError> {
        let key = tag.render();
        let mut table = self.table.lock().await;

        if let Some(reason) = &table.invalidated {
            return Err(CoreError::StreamDisconnected {
                reason: reason.clone(),
            });
        }

        let id = SubscriptionId::new();

        if let Some(entry) = table.entries.get_mut(&key) {
            entry.callbacks.push((id, callback));
            debug!(tag = %key, count = entry.callbacks.len(), "callback attached");
        } else {
            let results = bounded(
                self.timeout,
                "subscribe_events",
                self.rpc
                    .subscribe_events(tag.rules(), vec![tag.descriptor()]),
            )
            .await?;
            check_status("subscribe_events", &key, &results)?;
            debug!(tag = %key, "remote subscription created");
            table.entries.insert(
                key.clone(),
                Entry {
                    tag,
                    callbacks: vec![(id, callback)],
                },
            );
        }

        table.index.insert(id, key);
        Ok(id)
    }

    /// Detach one callback. The remote subscription goes away with the last
    /// callback. Unknown ids (already released) are ignored.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), CoreError> {
        let mut table = self.table.lock().await;

        let Some(key) = table.index.remove(&id) else {
            debug!(%id, "unsubscribe of unknown id ignored");
            return Ok(());
        };

        let Some(entry) = table.entries.get_mut(&key) else {
            return Ok(());
        };
        entry.callbacks.retain(|(cb_id, _)| *cb_id != id);
        if !entry.callbacks.is_empty() {
            debug!(tag = %key, count = entry.callbacks.len(), "callback detached");
            return Ok(());
        }

        let Some(entry) = table.entries.remove(&key) else {
            return Ok(());
        };
        let rules = entry.tag.rules().to_owned();
        let results = bounded(
            self.timeout,
            "unsubscribe_events",
            self.rpc.unsubscribe_events(&rules, vec![key.clone()]),
        )
        .await?;
        check_status("unsubscribe_events", &key, &results)?;
        debug!(tag = %key, "remote subscription removed");
        Ok(())
    }

    /// Tear down every subscription rooted at or under `path` in `rules`.
    ///
    /// Local entries are always removed; failures of the remote unsubscribe
    /// are logged and otherwise ignored. Returns the number of tags removed.
    pub async fn release_under(&self, rules: &str, path: &DatamodelPath) -> usize {
        self.release_where(rules, path, |_| true).await
    }

    /// Release after `path` was deleted. `deleted` subscriptions survive
    /// until their event has been dispatched (see [`retire`](Self::retire)).
    ///
    /// A server that never sends the deletion event leaves those entries
    /// behind; releasing any ancestor with [`release_under`](Self::release_under)
    /// still removes them, as does closing the session.
    pub(crate) async fn release_deleted(&self, rules: &str, path: &DatamodelPath) -> usize {
        self.release_where(rules, path, |tag| tag.kind() != EventKind::Deleted)
            .await
    }

    async fn release_where<F>(&self, rules: &str, path: &DatamodelPath, selected: F) -> usize
    where
        F: Fn(&EventTag) -> bool,
    {
        let mut table = self.table.lock().await;

        let doomed: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, entry)| entry.tag.is_under(rules, path) && selected(&entry.tag))
            .map(|(key, _)| key.clone())
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        for key in &doomed {
            table.entries.remove(key);
        }
        table.index.retain(|_, key| !doomed.contains(key));

        if table.invalidated.is_none() {
            self.unsubscribe_quietly(rules, doomed.clone()).await;
        }

        debug!(rules, path = %path, count = doomed.len(), "released subscriptions");
        doomed.len()
    }

    /// Drop the entry for `key` once its object is gone for good.
    pub(crate) async fn retire(&self, key: &str) {
        let mut table = self.table.lock().await;
        let Some(entry) = table.entries.remove(key) else {
            return;
        };
        table.index.retain(|_, k| k != key);
        if table.invalidated.is_none() {
            self.unsubscribe_quietly(entry.tag.rules(), vec![key.to_owned()])
                .await;
        }
        debug!(tag = %key, "subscription retired");
    }

    async fn unsubscribe_quietly(&self, rules: &str, tags: Vec<String>) {
        match bounded(
            self.timeout,
            "unsubscribe_events",
            self.rpc.unsubscribe_events(rules, tags),
        )
        .await
        {
            Ok(results) => {
                for failed in results.iter().filter(|r| !r.is_ok()) {
                    warn!(tag = %failed.tag, message = ?failed.message, "remote unsubscribe refused");
                }
            }
            Err(e) => warn!(error = %e, rules, "remote unsubscribe failed during release"),
        }
    }

    /// Snapshot of a tag's subscription and callbacks, in registration order.
    pub(crate) async fn callbacks_for(&self, key: &str) -> Option<(EventTag, Vec<Callback>)> {
        let table = self.table.lock().await;
        let entry = table.entries.get(key)?;
        Some((
            entry.tag.clone(),
            entry.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
        ))
    }

    /// Tags that currently hold a remote subscription, sorted.
    pub async fn active_tags(&self) -> Vec<String> {
        let table = self.table.lock().await;
        let mut tags: Vec<String> = table.entries.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Number of live callbacks on `tag` (its reference count).
    pub async fn callback_count(&self, tag: &str) -> usize {
        let table = self.table.lock().await;
        table.entries.get(tag).map_or(0, |e| e.callbacks.len())
    }

    /// Mark every subscription invalid after the stream is lost. Entries are
    /// dropped without remote calls and later subscribes fail.
    pub(crate) async fn invalidate(&self, reason: &str) {
        let mut table = self.table.lock().await;
        let dropped = table.entries.len();
        table.entries.clear();
        table.index.clear();
        table.invalidated = Some(reason.to_owned());
        debug!(dropped, reason, "subscriptions invalidated");
    }

    /// Best-effort removal of every remote subscription (session close).
    pub(crate) async fn clear(&self) {
        let mut table = self.table.lock().await;
        let mut by_rules: HashMap<String, Vec<String>> = HashMap::new();
        for (key, entry) in table.entries.drain() {
            by_rules
                .entry(entry.tag.rules().to_owned())
                .or_default()
                .push(key);
        }
        table.index.clear();
        if table.invalidated.is_some() {
            return;
        }
        table.invalidated = Some("session closed".into());
        for (rules, tags) in by_rules {
            if let Err(e) = bounded(
                self.timeout,
                "unsubscribe_events",
                self.rpc.unsubscribe_events(&rules, tags),
            )
            .await
            {
                warn!(error = %e, rules, "remote unsubscribe failed during close");
            }
        }
    }
}

fn check_status(
    operation: &str,
    key: &str,
    results: &[SubscriptionResult],
) -> Result<(), CoreError> {
    match results.iter().find(|r| r.tag == key) {
        Some(result) if result.is_ok() => Ok(()),
        Some(result) => Err(CoreError::RemoteRejection {
            operation: operation.into(),
            message: result
                .message
                .clone()
                .unwrap_or_else(|| format!("subscription '{key}' refused")),
        }),
        None => Err(CoreError::RemoteRejection {
            operation: operation.into(),
            message: format!("no status returned for '{key}'"),
        }),
    }
}
