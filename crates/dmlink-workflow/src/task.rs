// ── Tasks ──
//
// A task is a `TaskObject:<id>` member of the workflow namespace. The id is
// internal (`TaskObject3`); `_name_` holds the display name. What a task
// can do depends on its `TaskType`.

use std::collections::BTreeSet;
use std::fmt;

use dmlink_core::{
    ContainerOf, NamedObjectContainer, ObjectNode, ParameterNode, ReadOnly, Readable, Subscription,
    Writable,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info};

use crate::error::WorkflowError;

/// Container type of task members.
pub const TASK_OBJECT: &str = "TaskObject";

// ── TaskType ─────────────────────────────────────────────────────

/// Task variant, from the `TaskType` parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum TaskType {
    /// Leaf task. Children added to a compound task report "Compound Child"
    /// and behave the same.
    #[strum(to_string = "Simple", serialize = "Compound Child")]
    Simple,
    /// Executable; can add child tasks.
    Compound,
    /// Pure grouping; never executed itself.
    Composite,
    /// Executable; some children may be inactive.
    Conditional,
}

impl TaskType {
    pub fn is_executable(self) -> bool {
        !matches!(self, Self::Composite)
    }
}

// ── TaskState ────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum TaskState {
    #[strum(serialize = "Out-of-date")]
    #[serde(rename = "Out-of-date")]
    OutOfDate,
    #[strum(serialize = "Up-to-date")]
    #[serde(rename = "Up-to-date")]
    UpToDate,
}

// ── TaskSnapshot ─────────────────────────────────────────────────

/// The resolved state of one task, as read in a single call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSnapshot {
    #[serde(rename = "_name_", default)]
    pub name: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub task_list: Vec<String>,
    #[serde(default)]
    pub inactive_task_list: Vec<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub command_name: String,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub arguments: Value,
}

impl TaskSnapshot {
    pub(crate) fn from_value(id: &str, value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::invalid(id, e.to_string()))
    }

    pub fn kind(&self, id: &str) -> Result<TaskType, WorkflowError> {
        self.task_type.parse().map_err(|_| {
            WorkflowError::invalid(id, format!("unknown task type '{}'", self.task_type))
        })
    }

    pub fn execution_state(&self, id: &str) -> Result<TaskState, WorkflowError> {
        self.state
            .parse()
            .map_err(|_| WorkflowError::invalid(id, format!("unknown task state '{}'", self.state)))
    }

    /// Active children: the task list minus anything marked inactive.
    pub fn active_children(&self) -> Vec<String> {
        self.task_list
            .iter()
            .filter(|id| !self.inactive_task_list.contains(id))
            .cloned()
            .collect()
    }

    pub fn required_set(&self) -> BTreeSet<String> {
        self.required_inputs.iter().cloned().collect()
    }

    pub fn output_set(&self) -> BTreeSet<String> {
        self.outputs.iter().cloned().collect()
    }
}

// ── TaskOutcome ──────────────────────────────────────────────────

/// Result of [`Task::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task: String,
    pub name: String,
    pub state: TaskState,
    pub errors: Vec<String>,
    /// False when the task was already up to date, or blocked by errors,
    /// and nothing was sent to the server.
    pub ran: bool,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.state == TaskState::UpToDate && self.errors.is_empty()
    }
}

// ── Task ─────────────────────────────────────────────────────────

/// Handle on one task of the workflow.
#[derive(Clone)]
pub struct Task {
    id: String,
    node: ObjectNode,
    tasks: NamedObjectContainer,
}

impl Task {
    pub(crate) fn new(id: &str, tasks: &NamedObjectContainer) -> Result<Self, WorkflowError> {
        Ok(Self {
            id: id.to_owned(),
            node: tasks.object(id)?,
            tasks: tasks.clone(),
        })
    }

    /// Internal id (`TaskObject3`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Numeric part of the id.
    pub fn index(&self) -> Option<u32> {
        self.id.strip_prefix(TASK_OBJECT)?.parse().ok()
    }

    pub fn node(&self) -> &ObjectNode {
        &self.node
    }

    pub async fn snapshot(&self) -> Result<TaskSnapshot, WorkflowError> {
        let state = self.node.get_state(false).await?;
        TaskSnapshot::from_value(&self.id, state)
    }

    pub async fn display_name(&self) -> Result<String, WorkflowError> {
        Ok(self.snapshot().await?.name)
    }

    pub async fn task_type(&self) -> Result<TaskType, WorkflowError> {
        self.snapshot().await?.kind(&self.id)
    }

    pub async fn state(&self) -> Result<TaskState, WorkflowError> {
        self.snapshot().await?.execution_state(&self.id)
    }

    pub async fn errors(&self) -> Result<Vec<String>, WorkflowError> {
        Ok(self.snapshot().await?.errors)
    }

    // ── Children ─────────────────────────────────────────────────

    /// Child tasks in workflow order.
    pub async fn ordered_children(&self) -> Result<Vec<Task>, WorkflowError> {
        let snapshot = self.snapshot().await?;
        self.handles(&snapshot.task_list)
    }

    /// Children a conditional task currently skips. Empty for other kinds.
    pub async fn inactive_children(&self) -> Result<Vec<Task>, WorkflowError> {
        let snapshot = self.snapshot().await?;
        if snapshot.kind(&self.id)? != TaskType::Conditional {
            return Ok(Vec::new());
        }
        self.handles(&snapshot.inactive_task_list)
    }

    fn handles(&self, ids: &[String]) -> Result<Vec<Task>, WorkflowError> {
        ids.iter().map(|id| Task::new(id, &self.tasks)).collect()
    }

    /// Add a child to a compound task, seeded with `arguments`. Returns the
    /// new (last) child.
    pub async fn add_child(&self, arguments: Option<Map<String, Value>>) -> Result<Task, WorkflowError> {
        if self.task_type().await? != TaskType::Compound {
            return Err(self.unsupported("add_child"));
        }
        let mut arguments = arguments.unwrap_or_default();
        arguments.insert("AddChild".into(), Value::String("yes".into()));
        self.set_arguments(Value::Object(arguments)).await?;
        self.node.execute("AddChildToTask", Map::new()).await?;

        let children = self.ordered_children().await?;
        let child = children
            .into_iter()
            .last()
            .ok_or_else(|| WorkflowError::invalid(&self.id, "no child after AddChildToTask"))?;
        info!(task = %self.id, child = %child.id, "child task added");
        Ok(child)
    }

    /// Insert a task running `command` right after this one.
    pub async fn insert_next_task(&self, command: &str) -> Result<Task, WorkflowError> {
        let mut args = Map::new();
        args.insert("CommandName".into(), Value::String(command.to_owned()));
        let created = self.node.execute("InsertNextTask", args).await?;
        let id = created.as_str().ok_or_else(|| {
            WorkflowError::invalid(&self.id, format!("InsertNextTask returned {created}"))
        })?;
        debug!(task = %self.id, inserted = id, command, "task inserted");
        Task::new(id, &self.tasks)
    }

    // ── Arguments ────────────────────────────────────────────────

    /// The task's arguments. The view cannot write; use
    /// [`set_arguments`](Self::set_arguments).
    pub fn arguments(&self) -> Result<ReadOnly<ParameterNode>, WorkflowError> {
        Ok(ReadOnly::new(self.arguments_node()?))
    }

    /// Merge `value` into the arguments. New arguments invalidate the task:
    /// it goes back to Out-of-date with its errors cleared.
    pub async fn set_arguments(&self, value: Value) -> Result<(), WorkflowError> {
        let mut patch = Map::new();
        patch.insert("Arguments".into(), value);
        patch.insert("State".into(), Value::String(TaskState::OutOfDate.to_string()));
        patch.insert("Errors".into(), Value::Array(Vec::new()));
        self.node.set_state(Value::Object(patch)).await?;
        Ok(())
    }

    fn arguments_node(&self) -> Result<ParameterNode, WorkflowError> {
        Ok(self.node.parameter("Arguments")?)
    }

    // ── Execution ────────────────────────────────────────────────

    /// Run the task if it is out of date and has no errors.
    ///
    /// Validation failures come back in the outcome; an `Err` means the
    /// task could not be run at all.
    pub async fn execute(&self) -> Result<TaskOutcome, WorkflowError> {
        let before = self.snapshot().await?;
        if !before.kind(&self.id)?.is_executable() {
            return Err(WorkflowError::NotExecutable {
                task: self.id.clone(),
            });
        }
        if before.command_name.is_empty() {
            return Err(WorkflowError::MissingCommand {
                task: self.id.clone(),
            });
        }

        let state = before.execution_state(&self.id)?;
        if state == TaskState::UpToDate || !before.errors.is_empty() {
            debug!(task = %self.id, %state, errors = before.errors.len(), "task not run");
            return Ok(self.outcome(before, state, false));
        }

        self.node.execute("Execute", Map::new()).await?;

        let after = self.snapshot().await?;
        let state = after.execution_state(&self.id)?;
        info!(task = %self.id, name = %after.name, %state, errors = after.errors.len(), "task executed");
        Ok(self.outcome(after, state, true))
    }

    fn outcome(&self, snapshot: TaskSnapshot, state: TaskState, ran: bool) -> TaskOutcome {
        TaskOutcome {
            task: self.id.clone(),
            name: snapshot.name,
            state,
            errors: snapshot.errors,
            ran,
        }
    }

    /// Call `callback` with the new state whenever the task's state changes.
    pub async fn on_state_changed<F>(&self, callback: F) -> Result<Subscription, WorkflowError>
    where
        F: Fn(TaskState) + Send + Sync + 'static,
    {
        let state = self.node.parameter("State")?;
        let subscription = state
            .on_modified(move |event| {
                if let Some(next) = event
                    .state()
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                {
                    callback(next);
                }
            })
            .await?;
        Ok(subscription)
    }

    /// Tear down every subscription made on this task.
    pub async fn release(&self) -> usize {
        self.node.release().await
    }

    fn unsupported(&self, operation: &str) -> WorkflowError {
        WorkflowError::UnsupportedOperation {
            task: self.id.clone(),
            operation: operation.to_owned(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish_non_exhaustive()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.node.path() == other.node.path()
    }
}
