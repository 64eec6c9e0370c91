// ── Session ──
//
// One session = one backend connection, one subscription registry, one
// schema cache and (once something subscribes) one event stream with its
// dispatcher task. Everything a node needs is reached through here.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dmlink_api::transport::{TlsMode, TransportConfig};
use dmlink_api::{DatamodelRpc, HttpDatamodelClient, TypeInfo};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::StateCache;
use crate::call::bounded;
use crate::config::{SessionConfig, TlsVerification};
use crate::dispatch::Dispatcher;
use crate::error::CoreError;
use crate::node::ObjectNode;
use crate::path::DatamodelPath;
use crate::registry::{Callback, SubscriptionId, SubscriptionRegistry};
use crate::tag::EventTag;

// ── ConnectionState ──────────────────────────────────────────────

/// State of the session's event stream, observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream opened yet (nothing has subscribed).
    Idle,
    Connected,
    /// The stream dropped. Subscriptions are invalid and are not restored.
    Disconnected { reason: String },
    Closed,
}

// ── Session ──────────────────────────────────────────────────────

/// Entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`; every node holds a clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    rpc: Arc<dyn DatamodelRpc>,
    registry: Arc<SubscriptionRegistry>,
    cache: Option<Arc<StateCache>>,
    schemas: DashMap<String, Arc<TypeInfo>>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Build a session talking HTTP + WebSocket to `config.url`.
    ///
    /// No I/O happens here; the first call does.
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let transport = build_transport(&config);
        let client = HttpDatamodelClient::new(config.url.clone(), &transport)?;
        Ok(Self::with_rpc(Arc::new(client), config))
    }

    /// Build a session over any backend (the in-memory datamodel in tests).
    pub fn with_rpc(rpc: Arc<dyn DatamodelRpc>, config: SessionConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&rpc), config.timeout));
        let cache = config.diff_state.then(|| Arc::new(StateCache::new()));
        let (connection_state, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(SessionInner {
                config,
                rpc,
                registry,
                cache,
                schemas: DashMap::new(),
                connection_state,
                cancel: CancellationToken::new(),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Subscribe to event-stream state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Schema ───────────────────────────────────────────────────

    /// Static type information for `rules`, fetched once per session.
    pub async fn schema(&self, rules: &str) -> Result<Arc<TypeInfo>, CoreError> {
        if let Some(info) = self.inner.schemas.get(rules) {
            return Ok(Arc::clone(info.value()));
        }
        let info = Arc::new(
            self.call("get_static_info", self.inner.rpc.get_static_info(rules))
                .await?,
        );
        debug!(rules, "schema cached");
        self.inner
            .schemas
            .insert(rules.to_owned(), Arc::clone(&info));
        Ok(info)
    }

    /// Root object of a rules namespace.
    pub async fn root(&self, rules: &str) -> Result<ObjectNode, CoreError> {
        let info = self.schema(rules).await?;
        Ok(ObjectNode::new(
            self.clone(),
            rules.to_owned(),
            DatamodelPath::root(),
            info,
        ))
    }

    /// Root of the configured default namespace.
    pub async fn default_root(&self) -> Result<ObjectNode, CoreError> {
        let rules = self.inner.config.default_rules.clone();
        self.root(&rules).await
    }

    // ── Event stream ─────────────────────────────────────────────

    /// Open the event stream and start the dispatcher. Idempotent while the
    /// stream is up; after a disconnect it fails instead of reconnecting.
    pub async fn start_streaming(&self) -> Result<(), CoreError> {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if self.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        let lost = match &*self.inner.connection_state.borrow() {
            ConnectionState::Disconnected { reason } => Some(reason.clone()),
            _ => None,
        };
        if let Some(reason) = lost {
            return Err(CoreError::StreamDisconnected { reason });
        }
        if dispatcher.is_some() {
            return Ok(());
        }

        let stream = bounded(
            self.inner.config.timeout,
            "begin_streaming",
            self.inner.rpc.begin_streaming(),
        )
        .await?;
        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        let handle = Dispatcher::new(
            Arc::clone(&self.inner.registry),
            self.inner.cache.clone(),
            self.inner.connection_state.clone(),
            self.inner.cancel.child_token(),
        )
        .spawn(stream);
        *dispatcher = Some(handle);
        Ok(())
    }

    /// Register `callback` for `tag`, opening the stream first if needed.
    pub async fn subscribe(&self, tag: EventTag, callback: Callback) -> Result<Subscription, CoreError> {
        self.start_streaming().await?;
        let key = tag.render();
        let id = self.inner.registry.subscribe(tag, callback).await?;
        Ok(Subscription {
            id,
            tag: key,
            session: self.clone(),
        })
    }

    /// Drop every subscription rooted at or under `path`.
    pub async fn release_under(&self, rules: &str, path: &DatamodelPath) -> usize {
        if let Some(cache) = &self.inner.cache {
            cache.forget_under(rules, path);
        }
        self.inner.registry.release_under(rules, path).await
    }

    /// Release after a delete; see [`SubscriptionRegistry::release_deleted`].
    pub(crate) async fn release_deleted(&self, rules: &str, path: &DatamodelPath) -> usize {
        if let Some(cache) = &self.inner.cache {
            cache.forget_under(rules, path);
        }
        self.inner.registry.release_deleted(rules, path).await
    }

    // ── Unary calls ──────────────────────────────────────────────

    pub(crate) fn rpc(&self) -> &dyn DatamodelRpc {
        self.inner.rpc.as_ref()
    }

    /// Run one unary call under the configured timeout.
    pub(crate) async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, dmlink_api::Error>>,
    {
        if self.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        bounded(self.inner.config.timeout, operation, fut).await
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Close the session: remove remote subscriptions (best effort), stop
    /// the dispatcher and wait for it. No callback fires afterwards.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.cancel.cancel();

        self.inner.registry.clear().await;

        let handle = self.inner.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
        let _ = self.inner.connection_state.send(ConnectionState::Closed);
        info!("session closed");
    }

    /// Run `f` with this session and close it afterwards, whatever `f`
    /// returned.
    pub async fn scoped<F, Fut, T>(self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let session = self.clone();
        let result = f(self).await;
        session.close().await;
        result
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// Handle returned by every `on_*` method.
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe)
/// or release the node the subscription is rooted at.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    tag: String,
    session: Session,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn unsubscribe(self) -> Result<(), CoreError> {
        self.session.inner.registry.unsubscribe(self.id).await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

fn build_transport(config: &SessionConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.timeout,
        token: config.token.clone(),
    }
}
