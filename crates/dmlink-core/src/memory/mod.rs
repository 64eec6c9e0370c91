// ── In-memory datamodel ──
//
// An in-process implementation of `DatamodelRpc`: one state tree per rules
// namespace (explicit and default layers), attributes, command handlers and
// the event stream. Events are derived from what each call changed, so a
// `Session` over this backend behaves like one over a live server.

mod namespace;
mod tree;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dmlink_api::{
    DatamodelRpc, Error, EventDescriptor, EventPayload, EventRequest, EventStream, StreamMessage,
    SubscriptionResult, TypeInfo,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

pub use namespace::CommandContext;
use namespace::{Change, NamespaceState};
use tree::Target;

use crate::error::CoreError;
use crate::path::{DatamodelPath, PathSegment};

/// Server-side body of a command. Runs while the datamodel is locked, so it
/// must not call back into the datamodel; it works through the context.
///
/// An `Err` rolls every change made by the handler back and is reported to
/// the caller as a rejection.
pub type CommandHandler =
    Arc<dyn Fn(&mut CommandContext<'_>) -> Result<Value, String> + Send + Sync>;

/// How often each RPC was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_static_info: usize,
    pub get_state: usize,
    pub set_state: usize,
    pub get_attribute_value: usize,
    pub execute_command: usize,
    pub delete_object: usize,
    pub subscribe_events: usize,
    pub unsubscribe_events: usize,
    pub begin_streaming: usize,
}

type Sender = mpsc::UnboundedSender<Result<StreamMessage, Error>>;

struct Sub {
    rules: String,
    request: EventRequest,
    path: DatamodelPath,
    /// Path whose resolved state decides modified/affected events.
    watched: Option<DatamodelPath>,
}

#[derive(Default)]
struct Inner {
    namespaces: HashMap<String, NamespaceState>,
    /// `(rules, type name or "" for the root, command)` → handler.
    handlers: HashMap<(String, String, String), CommandHandler>,
    subscriptions: BTreeMap<String, Sub>,
    stream: Option<Sender>,
    calls: CallCounts,
    delay: Duration,
}

/// In-process datamodel server.
#[derive(Default)]
pub struct InMemoryDatamodel {
    inner: Mutex<Inner>,
}

impl InMemoryDatamodel {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Setup ────────────────────────────────────────────────────

    pub fn with_namespace(mut self, rules: impl Into<String>, schema: TypeInfo) -> Self {
        self.inner_mut()
            .namespaces
            .insert(rules.into(), NamespaceState::new(schema));
        self
    }

    /// Seed explicit state at `path` without emitting events.
    pub fn with_state(mut self, rules: &str, path: &str, value: Value) -> Result<Self, CoreError> {
        let path: DatamodelPath = path.parse()?;
        let state = self.inner_mut().namespace_mut(rules)?;
        state.write(&path, value).map_err(CoreError::addressing)?;
        Ok(self)
    }

    /// Seed the default layer at `path`.
    pub fn with_defaults(mut self, rules: &str, path: &str, value: Value) -> Result<Self, CoreError> {
        let path: DatamodelPath = path.parse()?;
        let state = self.inner_mut().namespace_mut(rules)?;
        state.write_defaults(&path, value).map_err(CoreError::addressing)?;
        Ok(self)
    }

    /// Register the body of `command` on objects of `type_name` (`""` for
    /// the namespace root). Commands without a handler return `null`.
    pub fn with_handler<F>(mut self, rules: &str, type_name: &str, command: &str, handler: F) -> Self
    where
        F: Fn(&mut CommandContext<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.inner_mut().handlers.insert(
            (rules.to_owned(), type_name.to_owned(), command.to_owned()),
            Arc::new(handler),
        );
        self
    }

    // ── Server-side actions ──────────────────────────────────────

    /// Change an attribute of the object at `path`, as the server would.
    pub fn set_attribute(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let path: DatamodelPath = path.parse()?;
        let mut inner = self.lock();
        inner
            .namespace_mut(rules)?
            .attributes
            .insert((path.encode(), attribute.to_owned()), value.clone());

        let messages: Vec<StreamMessage> = inner
            .subs_in(rules)
            .filter(|(_, sub)| {
                sub.path == path
                    && matches!(&sub.request, EventRequest::AttributeChanged { attribute: a, .. } if a == attribute)
            })
            .map(|(tag, _)| message(tag, EventPayload::AttributeChanged { value: value.clone() }))
            .collect();
        inner.send(messages);
        Ok(())
    }

    /// Change an attribute of `command` on the object at `path`.
    pub fn set_command_attribute(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let path: DatamodelPath = path.parse()?;
        let mut inner = self.lock();
        inner.namespace_mut(rules)?.command_attributes.insert(
            (path.encode(), command.to_owned(), attribute.to_owned()),
            value.clone(),
        );

        let messages: Vec<StreamMessage> = inner
            .subs_in(rules)
            .filter(|(_, sub)| {
                sub.path == path
                    && matches!(
                        &sub.request,
                        EventRequest::CommandAttributeChanged { command: c, attribute: a, .. }
                            if c == command && a == attribute
                    )
            })
            .map(|(tag, _)| {
                message(
                    tag,
                    EventPayload::CommandAttributeChanged {
                        value: value.clone(),
                    },
                )
            })
            .collect();
        inner.send(messages);
        Ok(())
    }

    /// Push a raw message onto the event stream.
    pub fn emit(&self, message: StreamMessage) {
        self.lock().send(vec![message]);
    }

    /// End the event stream cleanly. Server-side subscriptions go with it.
    pub fn disconnect_stream(&self) {
        let mut inner = self.lock();
        inner.stream = None;
        inner.subscriptions.clear();
        debug!("in-memory stream disconnected");
    }

    /// End the event stream with an error.
    pub fn fail_stream(&self, reason: &str) {
        let mut inner = self.lock();
        if let Some(tx) = inner.stream.take() {
            let _ = tx.send(Err(Error::StreamEnded(reason.to_owned())));
        }
        inner.subscriptions.clear();
    }

    /// Delay applied before every RPC completes.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Tags with a live server-side subscription, sorted.
    pub fn active_tags(&self) -> Vec<String> {
        self.lock().subscriptions.keys().cloned().collect()
    }

    /// Explicit layer at `path`, or `None` if nothing was ever set there.
    pub fn explicit_state(&self, rules: &str, path: &str) -> Option<Value> {
        let path: DatamodelPath = path.parse().ok()?;
        let inner = self.lock();
        let state = inner.namespaces.get(rules)?;
        tree::lookup(&state.explicit, path.segments()).cloned()
    }

    // ── Internals ────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inner_mut(&mut self) -> &mut Inner {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl fmt::Debug for InMemoryDatamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let mut namespaces: Vec<&String> = inner.namespaces.keys().collect();
        namespaces.sort();
        f.debug_struct("InMemoryDatamodel")
            .field("namespaces", &namespaces)
            .field("subscriptions", &inner.subscriptions.len())
            .field("streaming", &inner.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn namespace(&self, rules: &str) -> Result<&NamespaceState, String> {
        self.namespaces
            .get(rules)
            .ok_or_else(|| format!("Unknown rules namespace '{rules}'"))
    }

    fn namespace_mut(&mut self, rules: &str) -> Result<&mut NamespaceState, CoreError> {
        self.namespaces
            .get_mut(rules)
            .ok_or_else(|| CoreError::addressing(format!("Unknown rules namespace '{rules}'")))
    }

    fn subs_in<'a>(&'a self, rules: &'a str) -> impl Iterator<Item = (&'a String, &'a Sub)> + 'a {
        self.subscriptions
            .iter()
            .filter(move |(_, sub)| sub.rules == rules)
    }

    /// Resolved state of every watched path in `rules`, keyed by tag.
    fn snapshot(&self, rules: &str) -> HashMap<String, Option<Value>> {
        let Some(state) = self.namespaces.get(rules) else {
            return HashMap::new();
        };
        self.subs_in(rules)
            .filter_map(|(tag, sub)| {
                let watched = sub.watched.as_ref()?;
                Some((tag.clone(), state.resolved(watched)))
            })
            .collect()
    }

    /// Derive and send the events for one completed call: created, deleted,
    /// modified, affected, then command executed.
    fn publish(
        &self,
        rules: &str,
        before: &HashMap<String, Option<Value>>,
        changes: &[Change],
        executed: Option<(&DatamodelPath, &str, &Map<String, Value>)>,
    ) {
        if self.stream.is_none() {
            return;
        }
        let Some(state) = self.namespaces.get(rules) else {
            return;
        };
        let mut out = Vec::new();

        for change in changes {
            for (tag, sub) in self.subs_in(rules) {
                match (change, &sub.request) {
                    (Change::Set { path, created: true }, EventRequest::Created { child_type, .. })
                        if path.parent().as_ref() == Some(&sub.path)
                            && path.last().is_some_and(|s| s.type_name() == child_type) =>
                    {
                        out.push(message(
                            tag,
                            EventPayload::Created {
                                child_path: path.encode(),
                            },
                        ));
                    }
                    (Change::Deleted { path }, EventRequest::Deleted { .. })
                        if sub.path.starts_with(path) =>
                    {
                        out.push(message(
                            tag,
                            EventPayload::Deleted {
                                paths: vec![path.encode()],
                            },
                        ));
                    }
                    _ => {}
                }
            }
        }

        for wanted in [false, true] {
            for (tag, sub) in self.subs_in(rules) {
                let affected = matches!(sub.request, EventRequest::Affected { .. });
                if affected != wanted {
                    continue;
                }
                let Some(watched) = &sub.watched else {
                    continue;
                };
                let Some(now) = state.resolved(watched) else {
                    continue;
                };
                if before.get(tag).and_then(Option::as_ref) == Some(&now) {
                    continue;
                }
                let payload = if affected {
                    EventPayload::Affected
                } else {
                    EventPayload::Modified { state: now }
                };
                out.push(message(tag, payload));
            }
        }

        if let Some((path, command, args)) = executed {
            for (tag, sub) in self.subs_in(rules) {
                if let EventRequest::CommandExecuted { command: c, .. } = &sub.request {
                    if c == command && &sub.path == path {
                        out.push(message(
                            tag,
                            EventPayload::CommandExecuted {
                                command: command.to_owned(),
                                arguments: Value::Object(args.clone()),
                            },
                        ));
                    }
                }
            }
        }

        self.send(out);
    }

    fn send(&self, messages: Vec<StreamMessage>) {
        let Some(tx) = &self.stream else {
            return;
        };
        for message in messages {
            debug!(tag = %message.tag, "in-memory event");
            let _ = tx.send(Ok(message));
        }
    }
}

fn message(tag: &str, payload: EventPayload) -> StreamMessage {
    StreamMessage {
        tag: tag.to_owned(),
        payload,
    }
}

fn rejected(operation: &str, message: impl Into<String>) -> Error {
    Error::Rejected {
        operation: operation.to_owned(),
        message: message.into(),
    }
}

fn parse_path(operation: &str, raw: &str) -> Result<DatamodelPath, Error> {
    raw.parse()
        .map_err(|e: CoreError| rejected(operation, e.to_string()))
}

/// Check a subscription request against the schema and current state.
/// Returns the path it is rooted at and the path it watches.
fn check_request(
    state: &NamespaceState,
    request: &EventRequest,
) -> Result<(DatamodelPath, Option<DatamodelPath>), String> {
    let path: DatamodelPath = request.path().parse().map_err(|e: CoreError| e.to_string())?;
    let target = state.target(&path)?;
    if !state.exists(&path) {
        return Err(format!("No object at '{path}'"));
    }
    let object = match target {
        Target::Object(info) => Some(info),
        Target::Container(_) | Target::Parameter(_) => None,
    };

    let watched = match request {
        EventRequest::Created { child_type, .. } => {
            if !object.is_some_and(|info| info.named_objects.contains_key(child_type)) {
                return Err(format!("'{path}' has no container '{child_type}'"));
            }
            None
        }
        EventRequest::Deleted { .. } => {
            if path.last().is_none_or(PathSegment::is_singleton) {
                return Err(format!("'{path}' is not a named object"));
            }
            None
        }
        EventRequest::Modified { .. } | EventRequest::Affected { subtype: None, .. } => {
            Some(path.clone())
        }
        EventRequest::Affected {
            subtype: Some(subtype),
            ..
        } => {
            let known = object.is_some_and(|info| {
                info.named_objects.contains_key(subtype) || info.singletons.contains_key(subtype)
            });
            if !known {
                return Err(format!("'{path}' has no child type '{subtype}'"));
            }
            let segment = PathSegment::singleton(subtype.as_str()).map_err(|e| e.to_string())?;
            Some(path.join(segment))
        }
        EventRequest::AttributeChanged { .. } => None,
        EventRequest::CommandAttributeChanged { command, .. }
        | EventRequest::CommandExecuted { command, .. } => {
            if !object.is_some_and(|info| info.commands.contains_key(command)) {
                return Err(format!("'{path}' has no command '{command}'"));
            }
            None
        }
    };
    Ok((path, watched))
}

#[async_trait]
impl DatamodelRpc for InMemoryDatamodel {
    async fn get_static_info(&self, rules: &str) -> Result<TypeInfo, Error> {
        self.pause().await;
        let mut inner = self.lock();
        inner.calls.get_static_info += 1;
        let state = inner
            .namespace(rules)
            .map_err(|m| rejected("get_static_info", m))?;
        Ok(state.schema.clone())
    }

    async fn get_state(&self, rules: &str, path: &str, explicit_only: bool) -> Result<Value, Error> {
        self.pause().await;
        let path = parse_path("get_state", path)?;
        let mut inner = self.lock();
        inner.calls.get_state += 1;
        inner
            .namespace(rules)
            .and_then(|state| state.read(&path, explicit_only))
            .map_err(|m| rejected("get_state", m))
    }

    async fn set_state(&self, rules: &str, path: &str, state: Value) -> Result<(), Error> {
        self.pause().await;
        let path = parse_path("set_state", path)?;
        let mut inner = self.lock();
        inner.calls.set_state += 1;
        let before = inner.snapshot(rules);
        let changes = inner
            .namespaces
            .get_mut(rules)
            .ok_or_else(|| format!("Unknown rules namespace '{rules}'"))
            .and_then(|ns| ns.write(&path, state))
            .map_err(|m| rejected("set_state", m))?;
        inner.publish(rules, &before, &changes, None);
        Ok(())
    }

    async fn get_attribute_value(
        &self,
        rules: &str,
        path: &str,
        attribute: &str,
    ) -> Result<Value, Error> {
        self.pause().await;
        let path = parse_path("get_attribute_value", path)?;
        let mut inner = self.lock();
        inner.calls.get_attribute_value += 1;
        let state = inner
            .namespace(rules)
            .map_err(|m| rejected("get_attribute_value", m))?;
        state
            .attributes
            .get(&(path.encode(), attribute.to_owned()))
            .cloned()
            .ok_or_else(|| {
                rejected(
                    "get_attribute_value",
                    format!("No attribute '{attribute}' at '{path}'"),
                )
            })
    }

    async fn execute_command(
        &self,
        rules: &str,
        path: &str,
        command: &str,
        args: Map<String, Value>,
    ) -> Result<Value, Error> {
        self.pause().await;
        let path = parse_path("execute_command", path)?;
        let mut inner = self.lock();
        inner.calls.execute_command += 1;

        {
            let state = inner
                .namespace(rules)
                .map_err(|m| rejected("execute_command", m))?;
            let declared = matches!(
                state.target(&path),
                Ok(Target::Object(info)) if info.commands.contains_key(command)
            );
            if !declared {
                return Err(rejected(
                    "execute_command",
                    format!("No command '{command}' at '{path}'"),
                ));
            }
            if !state.exists(&path) {
                return Err(rejected("execute_command", format!("No object at '{path}'")));
            }
        }

        let type_name = path.last().map_or("", PathSegment::type_name);
        let handler = inner
            .handlers
            .get(&(rules.to_owned(), type_name.to_owned(), command.to_owned()))
            .cloned();
        let before = inner.snapshot(rules);

        let (result, changes) = match handler {
            None => (Value::Null, Vec::new()),
            Some(handler) => {
                let Some(state) = inner.namespaces.get_mut(rules) else {
                    return Err(rejected("execute_command", "namespace vanished"));
                };
                let backup = state.clone();
                let mut ctx = CommandContext {
                    state: &mut *state,
                    path: &path,
                    args: &args,
                    changes: Vec::new(),
                };
                match handler(&mut ctx) {
                    Ok(value) => (value, ctx.changes),
                    Err(message) => {
                        *state = backup;
                        debug!(command, path = %path, message = %message, "command failed");
                        return Err(rejected("execute_command", message));
                    }
                }
            }
        };

        inner.publish(rules, &before, &changes, Some((&path, command, &args)));
        Ok(result)
    }

    async fn delete_object(&self, rules: &str, path: &str) -> Result<(), Error> {
        self.pause().await;
        let path = parse_path("delete_object", path)?;
        let mut inner = self.lock();
        inner.calls.delete_object += 1;
        let before = inner.snapshot(rules);
        let changes = inner
            .namespaces
            .get_mut(rules)
            .ok_or_else(|| format!("Unknown rules namespace '{rules}'"))
            .and_then(|ns| ns.delete(&path))
            .map_err(|m| rejected("delete_object", m))?;
        inner.publish(rules, &before, &changes, None);
        Ok(())
    }

    async fn subscribe_events(
        &self,
        rules: &str,
        events: Vec<EventDescriptor>,
    ) -> Result<Vec<SubscriptionResult>, Error> {
        self.pause().await;
        let mut inner = self.lock();
        inner.calls.subscribe_events += 1;

        let mut results = Vec::with_capacity(events.len());
        for EventDescriptor { tag, request } in events {
            if inner.subscriptions.contains_key(&tag) {
                results.push(SubscriptionResult::failed(
                    tag.clone(),
                    format!("'{tag}' is already subscribed"),
                ));
                continue;
            }
            let checked = inner
                .namespace(rules)
                .and_then(|state| check_request(state, &request));
            match checked {
                Ok((path, watched)) => {
                    inner.subscriptions.insert(
                        tag.clone(),
                        Sub {
                            rules: rules.to_owned(),
                            request,
                            path,
                            watched,
                        },
                    );
                    results.push(SubscriptionResult::ok(tag));
                }
                Err(message) => results.push(SubscriptionResult::failed(tag, message)),
            }
        }
        Ok(results)
    }

    async fn unsubscribe_events(
        &self,
        rules: &str,
        tags: Vec<String>,
    ) -> Result<Vec<SubscriptionResult>, Error> {
        self.pause().await;
        let mut inner = self.lock();
        inner.calls.unsubscribe_events += 1;

        Ok(tags
            .into_iter()
            .map(|tag| {
                let owned = inner
                    .subscriptions
                    .get(&tag)
                    .is_some_and(|sub| sub.rules == rules);
                if owned {
                    inner.subscriptions.remove(&tag);
                    SubscriptionResult::ok(tag)
                } else {
                    let message = format!("'{tag}' is not subscribed");
                    SubscriptionResult::failed(tag, message)
                }
            })
            .collect())
    }

    async fn begin_streaming(&self) -> Result<EventStream, Error> {
        self.pause().await;
        let mut inner = self.lock();
        inner.calls.begin_streaming += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.stream = Some(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
