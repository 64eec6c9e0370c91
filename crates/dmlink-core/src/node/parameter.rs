use std::fmt;

use async_trait::async_trait;
use dmlink_api::{ParameterInfo, ValueType};
use serde_json::Value;

use super::{Readable, Writable, read_attribute, read_state, subscribe_at, write_state};
use crate::error::CoreError;
use crate::event::Event;
use crate::path::DatamodelPath;
use crate::session::{Session, Subscription};
use crate::tag::EventTarget;

/// A leaf value of an object.
#[derive(Clone)]
pub struct ParameterNode {
    session: Session,
    rules: String,
    path: DatamodelPath,
    info: ParameterInfo,
}

impl ParameterNode {
    pub(crate) fn new(
        session: Session,
        rules: String,
        path: DatamodelPath,
        info: ParameterInfo,
    ) -> Self {
        Self {
            session,
            rules,
            path,
            info,
        }
    }

    pub fn name(&self) -> &str {
        self.path.last().map_or("", |s| s.type_name())
    }

    pub fn value_type(&self) -> ValueType {
        self.info.value_type
    }

    pub fn help(&self) -> Option<&str> {
        self.info.help.as_deref()
    }

    pub async fn on_modified<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        subscribe_at(
            &self.session,
            &self.rules,
            &self.path,
            EventTarget::Modified,
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
        subscribe_at(
            &self.session,
            &self.rules,
            &self.path,
            EventTarget::AttributeChanged {
                attribute: attribute.to_owned(),
            },
            callback,
        )
        .await
    }
}

#[async_trait]
impl Readable for ParameterNode {
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
impl Writable for ParameterNode {
    async fn set_state(&self, value: Value) -> Result<(), CoreError> {
        write_state(&self.session, &self.rules, &self.path, value).await
    }
}

impl fmt::Debug for ParameterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterNode")
            .field("rules", &self.rules)
            .field("path", &self.path.encode())
            .field("type", &self.info.value_type)
            .finish_non_exhaustive()
    }
}
