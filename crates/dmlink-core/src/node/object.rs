use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dmlink_api::TypeInfo;
use serde_json::{Map, Value};
use tracing::debug;

use super::{
    Child, CommandNode, Invocable, NamedObjectContainer, ParameterNode, Readable, Writable,
    read_attribute, read_state, subscribe_at, write_state,
};
use crate::error::CoreError;
use crate::event::Event;
use crate::path::{DatamodelPath, PathSegment};
use crate::session::{Session, Subscription};
use crate::stream::EventStream;
use crate::tag::EventTarget;

/// A singleton object (or a named-object member, or a namespace root).
#[derive(Clone)]
pub struct ObjectNode {
    session: Session,
    rules: String,
    path: DatamodelPath,
    info: Arc<TypeInfo>,
}

impl ObjectNode {
    pub(crate) fn new(
        session: Session,
        rules: String,
        path: DatamodelPath,
        info: Arc<TypeInfo>,
    ) -> Self {
        Self {
            session,
            rules,
            path,
            info,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.info
    }

    /// Type name of the last path segment (empty at a namespace root).
    pub fn type_name(&self) -> &str {
        self.path.last().map_or("", PathSegment::type_name)
    }

    /// Instance name when this object is a named-object member.
    pub fn instance_name(&self) -> Option<&str> {
        self.path.last().and_then(PathSegment::instance)
    }

    // ── Children ─────────────────────────────────────────────────

    /// Every child name the schema declares, in declaration groups:
    /// singletons, containers, parameters, commands.
    pub fn child_names(&self) -> Vec<String> {
        self.info
            .singletons
            .keys()
            .chain(self.info.named_objects.keys())
            .chain(self.info.parameters.keys())
            .chain(self.info.commands.keys())
            .cloned()
            .collect()
    }

    pub fn command_names(&self) -> BTreeSet<String> {
        self.info.commands.keys().cloned().collect()
    }

    pub fn parameter_names(&self) -> BTreeSet<String> {
        self.info.parameters.keys().cloned().collect()
    }

    /// Resolve `name` against the schema.
    pub fn child(&self, name: &str) -> Result<Child, CoreError> {
        if let Some(info) = self.info.singletons.get(name) {
            return Ok(Child::Object(self.singleton_child(name, Arc::clone(info))?));
        }
        if let Some(info) = self.info.named_objects.get(name) {
            return Ok(Child::Container(NamedObjectContainer::new(
                self.session.clone(),
                self.rules.clone(),
                &self.path,
                name,
                Arc::clone(info),
            )?));
        }
        if let Some(info) = self.info.parameters.get(name) {
            let path = self.path.join(PathSegment::singleton(name)?);
            return Ok(Child::Parameter(ParameterNode::new(
                self.session.clone(),
                self.rules.clone(),
                path,
                info.clone(),
            )));
        }
        if let Some(info) = self.info.commands.get(name) {
            return Ok(Child::Command(CommandNode::new(
                self.session.clone(),
                self.rules.clone(),
                self.path.clone(),
                name.to_owned(),
                info.clone(),
            )));
        }
        Err(CoreError::addressing(format!(
            "'{}' has no child named '{name}'",
            self.describe()
        )))
    }

    pub fn object(&self, name: &str) -> Result<ObjectNode, CoreError> {
        match self.child(name)? {
            Child::Object(node) => Ok(node),
            other => Err(self.wrong_kind(name, "object", &other)),
        }
    }

    pub fn container(&self, name: &str) -> Result<NamedObjectContainer, CoreError> {
        match self.child(name)? {
            Child::Container(node) => Ok(node),
            other => Err(self.wrong_kind(name, "named-object container", &other)),
        }
    }

    pub fn parameter(&self, name: &str) -> Result<ParameterNode, CoreError> {
        match self.child(name)? {
            Child::Parameter(node) => Ok(node),
            other => Err(self.wrong_kind(name, "parameter", &other)),
        }
    }

    pub fn command(&self, name: &str) -> Result<CommandNode, CoreError> {
        match self.child(name)? {
            Child::Command(node) => Ok(node),
            other => Err(self.wrong_kind(name, "command", &other)),
        }
    }

    /// Run command `command` on this object.
    pub async fn execute(&self, command: &str, args: Map<String, Value>) -> Result<Value, CoreError> {
        self.command(command)?.execute(args).await
    }

    // ── Events ───────────────────────────────────────────────────

    pub async fn on_created<F>(&self, child_type: &str, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(
            EventTarget::Created {
                child_type: child_type.to_owned(),
            },
            callback,
        )
        .await
    }

    pub async fn on_modified<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::Modified, callback).await
    }

    pub async fn on_deleted<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::Deleted, callback).await
    }

    pub async fn on_affected<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(EventTarget::Affected { subtype: None }, callback)
            .await
    }

    /// Changes below direct children of type `child_type` only.
    pub async fn on_affected_at_type_path<F>(
        &self,
        child_type: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(
            EventTarget::Affected {
                subtype: Some(child_type.to_owned()),
            },
            callback,
        )
        .await
    }

    pub async fn on_attribute_changed<F>(
        &self,
        attribute: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(
            EventTarget::AttributeChanged {
                attribute: attribute.to_owned(),
            },
            callback,
        )
        .await
    }

    pub async fn on_command_attribute_changed<F>(
        &self,
        command: &str,
        attribute: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.check_command(command)?;
        self.subscribe(
            EventTarget::CommandAttributeChanged {
                command: command.to_owned(),
                attribute: attribute.to_owned(),
            },
            callback,
        )
        .await
    }

    pub async fn on_command_executed<F>(
        &self,
        command: &str,
        callback: F,
    ) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.check_command(command)?;
        self.subscribe(
            EventTarget::CommandExecuted {
                command: command.to_owned(),
            },
            callback,
        )
        .await
    }

    /// Events for `target` as a `Stream` instead of a callback.
    pub async fn watch(&self, target: EventTarget) -> Result<EventStream, CoreError> {
        EventStream::open(&self.session, &self.rules, &self.path, target).await
    }

    async fn subscribe<F>(&self, target: EventTarget, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        subscribe_at(&self.session, &self.rules, &self.path, target, callback).await
    }

    // ── Lifetime ─────────────────────────────────────────────────

    /// Tear down every subscription rooted at or under this object,
    /// whoever registered it. Returns how many tags were removed.
    pub async fn release(&self) -> usize {
        let released = self.session.release_under(&self.rules, &self.path).await;
        debug!(rules = %self.rules, path = %self.path, released, "object released");
        released
    }

    /// Release after the server deleted this object. Its `deleted`
    /// subscriptions stay until the deletion event has been dispatched.
    pub async fn release_deleted(&self) -> usize {
        let released = self.session.release_deleted(&self.rules, &self.path).await;
        debug!(rules = %self.rules, path = %self.path, released, "deleted object released");
        released
    }

    /// Run `f` with this object and release it afterwards, whatever `f`
    /// returned.
    pub async fn scoped<F, Fut, T>(self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(ObjectNode) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let node = self.clone();
        let result = f(self).await;
        node.release().await;
        result
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn singleton_child(&self, name: &str, info: Arc<TypeInfo>) -> Result<ObjectNode, CoreError> {
        Ok(ObjectNode::new(
            self.session.clone(),
            self.rules.clone(),
            self.path.join(PathSegment::singleton(name)?),
            info,
        ))
    }

    fn check_command(&self, command: &str) -> Result<(), CoreError> {
        if self.info.commands.contains_key(command) {
            Ok(())
        } else {
            Err(CoreError::addressing(format!(
                "'{}' has no command '{command}'",
                self.describe()
            )))
        }
    }

    fn wrong_kind(&self, name: &str, wanted: &str, got: &Child) -> CoreError {
        CoreError::addressing(format!(
            "'{name}' under '{}' is a {}, not a {wanted}",
            self.describe(),
            got.kind()
        ))
    }

    fn describe(&self) -> String {
        if self.path.is_root() {
            format!("{}:<root>", self.rules)
        } else {
            format!("{}:{}", self.rules, self.path)
        }
    }
}

#[async_trait]
impl Readable for ObjectNode {
    fn rules(&self) -> &str {
        &self.rules
    }

    fn path(&self) -> &DatamodelPath {
        &self.path
    }

    async fn get_state(&self, explicit_only: bool) -> Result<Value, CoreError> {
        read_state(&self.session, &self.rules, &self.path, explicit_only).await
    }

    async fn attribute_value(&self, attribute: &str) -> Result<Value, CoreError> {
        read_attribute(&self.session, &self.rules, &self.path, attribute).await
    }
}

#[async_trait]
impl Writable for ObjectNode {
    async fn set_state(&self, value: Value) -> Result<(), CoreError> {
        write_state(&self.session, &self.rules, &self.path, value).await
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("rules", &self.rules)
            .field("path", &self.path.encode())
            .finish_non_exhaustive()
    }
}
