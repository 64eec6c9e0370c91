use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use dmlink_api::{CommandInfo, ParameterInfo};
use serde_json::{Map, Value};

use super::{Invocable, subscribe_at};
use crate::error::CoreError;
use crate::event::Event;
use crate::path::DatamodelPath;
use crate::session::{Session, Subscription};
use crate::tag::EventTarget;

/// A command declared on an object. Runs remotely against the owner's path.
#[derive(Clone)]
pub struct CommandNode {
    session: Session,
    rules: String,
    owner: DatamodelPath,
    name: String,
    info: CommandInfo,
}

impl CommandNode {
    pub(crate) fn new(
        session: Session,
        rules: String,
        owner: DatamodelPath,
        name: String,
        info: CommandInfo,
    ) -> Self {
        Self {
            session,
            rules,
            owner,
            name,
            info,
        }
    }

    /// Path of the object the command belongs to.
    pub fn owner(&self) -> &DatamodelPath {
        &self.owner
    }

    /// Declared arguments, by name.
    pub fn command_arguments(&self) -> &BTreeMap<String, ParameterInfo> {
        &self.info.arguments
    }

    pub fn help(&self) -> Option<&str> {
        self.info.help.as_deref()
    }

    pub async fn on_executed<F>(&self, callback: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        subscribe_at(
            &self.session,
            &self.rules,
            &self.owner,
            EventTarget::CommandExecuted {
                command: self.name.clone(),
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
        subscribe_at(
            &self.session,
            &self.rules,
            &self.owner,
            EventTarget::CommandAttributeChanged {
                command: self.name.clone(),
                attribute: attribute.to_owned(),
            },
            callback,
        )
        .await
    }

    /// Commands that declare their arguments reject undeclared ones locally.
    fn check_arguments(&self, args: &Map<String, Value>) -> Result<(), CoreError> {
        if self.info.arguments.is_empty() {
            return Ok(());
        }
        match args.keys().find(|k| !self.info.arguments.contains_key(*k)) {
            Some(unknown) => Err(CoreError::addressing(format!(
                "command '{}' has no argument '{unknown}'",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Invocable for CommandNode {
    fn command_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, CoreError> {
        self.check_arguments(&args)?;
        let wire = self.owner.encode();
        self.session
            .call(
                "execute_command",
                self.session
                    .rpc()
                    .execute_command(&self.rules, &wire, &self.name, args),
            )
            .await
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("rules", &self.rules)
            .field("owner", &self.owner.encode())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
