use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dmlink_api::TypeInfo;
use serde_json::Value;

use super::{ContainerOf, ObjectNode, Readable, read_attribute, read_state, subscribe_at};
use crate::error::CoreError;
use crate::event::Event;
use crate::path::{DatamodelPath, PathSegment};
use crate::session::{Session, Subscription};
use crate::tag::EventTarget;

/// The set of `Type:Name` members of one type under a parent object.
///
/// Its own state is a map from member name to member state.
#[derive(Clone)]
pub struct NamedObjectContainer {
    session: Session,
    rules: String,
    parent: DatamodelPath,
    path: DatamodelPath,
    type_name: String,
    member_info: Arc<TypeInfo>,
}

impl NamedObjectContainer {
    pub(crate) fn new(
        session: Session,
        rules: String,
        parent: &DatamodelPath,
        type_name: &str,
        member_info: Arc<TypeInfo>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            session,
            rules,
            parent: parent.clone(),
            path: parent.join(PathSegment::singleton(type_name)?),
            type_name: type_name.to_owned(),
            member_info,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Schema shared by every member.
    pub fn member_info(&self) -> &Arc<TypeInfo> {
        &self.member_info
    }

    /// Member creation under the parent object.
    pub async fn on_created<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        subscribe_at(
            &self.session,
            &self.rules,
            &self.parent,
            EventTarget::Created {
                child_type: self.type_name.clone(),
            },
            callback,
        )
        .await
    }

    /// Delete several members, in order. Stops at the first failure.
    pub async fn delete_objects<S: AsRef<str> + Sync>(&self, names: &[S]) -> Result<(), CoreError> {
        for name in names {
            self.delete_object(name.as_ref()).await?;
        }
        Ok(())
    }

    /// Delete every current member.
    pub async fn delete_all(&self) -> Result<usize, CoreError> {
        let names = self.object_names().await?;
        self.delete_objects(&names).await?;
        Ok(names.len())
    }

    fn member_path(&self, name: &str) -> Result<DatamodelPath, CoreError> {
        Ok(self
            .parent
            .join(PathSegment::named(self.type_name.as_str(), name)?))
    }
}

#[async_trait]
impl ContainerOf<ObjectNode> for NamedObjectContainer {
    async fn object_names(&self) -> Result<Vec<String>, CoreError> {
        match self.get_state(false).await? {
            Value::Object(members) => Ok(members.keys().cloned().collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(CoreError::Internal(format!(
                "container '{}' state is not a map: {other}",
                self.path
            ))),
        }
    }

    fn object(&self, name: &str) -> Result<ObjectNode, CoreError> {
        Ok(ObjectNode::new(
            self.session.clone(),
            self.rules.clone(),
            self.member_path(name)?,
            Arc::clone(&self.member_info),
        ))
    }

    async fn delete_object(&self, name: &str) -> Result<(), CoreError> {
        let member = self.member_path(name)?;
        let wire = member.encode();
        self.session
            .call(
                "delete_object",
                self.session.rpc().delete_object(&self.rules, &wire),
            )
            .await?;
        // The member is gone; only its pending `deleted` events can still fire.
        self.session.release_deleted(&self.rules, &member).await;
        Ok(())
    }
}

#[async_trait]
impl Readable for NamedObjectContainer {
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

impl fmt::Debug for NamedObjectContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedObjectContainer")
            .field("rules", &self.rules)
            .field("path", &self.path.encode())
            .finish_non_exhaustive()
    }
}
