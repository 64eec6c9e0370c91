// ── Workflow ──
//
// The workflow namespace keeps an ordered list of top-level task ids on the
// `Workflow` singleton; every task may own an ordered list of child ids.
// All tree queries work from one read of the whole namespace so that a walk
// sees a consistent picture.

use std::collections::BTreeMap;

use dmlink_core::{ContainerOf, NamedObjectContainer, ObjectNode, Readable, Session};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::graph::{DependencyGraph, TaskNode};
use crate::task::{TASK_OBJECT, Task, TaskOutcome, TaskSnapshot};

/// Rules namespace served for guided workflows.
pub const WORKFLOW_RULES: &str = "workflow";

const WORKFLOW: &str = "Workflow";

// ── Tree snapshot ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct TreeSnapshot {
    top: Vec<String>,
    tasks: BTreeMap<String, TaskSnapshot>,
}

impl TreeSnapshot {
    fn from_value(state: &Value) -> Result<Self, WorkflowError> {
        let top = match state.pointer("/Workflow/TaskList") {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| WorkflowError::invalid(WORKFLOW, e.to_string()))?,
            None => Vec::new(),
        };
        let mut tasks = BTreeMap::new();
        if let Some(Value::Object(members)) = state.get(TASK_OBJECT) {
            for (id, member) in members {
                tasks.insert(id.clone(), TaskSnapshot::from_value(id, member.clone())?);
            }
        }
        Ok(Self { top, tasks })
    }

    fn get(&self, id: &str) -> Result<&TaskSnapshot, WorkflowError> {
        self.tasks.get(id).ok_or_else(|| unknown(id))
    }

    /// The task list `id` belongs to.
    fn siblings_of(&self, id: &str) -> Option<&[String]> {
        if self.top.iter().any(|t| t == id) {
            return Some(&self.top);
        }
        self.tasks
            .values()
            .find(|t| t.task_list.iter().any(|c| c == id))
            .map(|t| t.task_list.as_slice())
    }

    fn graph(&self, ids: &[String]) -> Result<DependencyGraph, WorkflowError> {
        let nodes = ids
            .iter()
            .map(|id| Ok(TaskNode::from_snapshot(id, self.get(id)?)))
            .collect::<Result<Vec<_>, WorkflowError>>()?;
        Ok(DependencyGraph::new(nodes))
    }

    /// Every task id, depth first in workflow order.
    fn walk(&self) -> Vec<String> {
        self.subtrees(self.top.as_slice())
    }

    /// `ids` and everything below them, depth first.
    fn subtrees<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        fn visit<S: AsRef<str>>(tree: &TreeSnapshot, ids: &[S], out: &mut Vec<String>) {
            for id in ids {
                let id = id.as_ref();
                if out.iter().any(|seen| seen == id) {
                    continue;
                }
                out.push(id.to_owned());
                if let Some(task) = tree.tasks.get(id) {
                    visit(tree, task.task_list.as_slice(), out);
                }
            }
        }
        let mut out = Vec::new();
        visit(self, ids, &mut out);
        out
    }
}

fn unknown(id: &str) -> WorkflowError {
    WorkflowError::UnknownTask {
        task: id.to_owned(),
    }
}

// ── ExecutionReport ──────────────────────────────────────────────

/// What [`Workflow::execute_all`] did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Task whose errors ended the run.
    pub stopped_at: Option<String>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.stopped_at.is_none()
    }

    /// Ids of tasks that were actually sent to the server.
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.ran)
            .map(|o| o.task.as_str())
            .collect()
    }
}

// ── Workflow ─────────────────────────────────────────────────────

/// Handle on the workflow tree of one session.
#[derive(Clone, Debug)]
pub struct Workflow {
    rules: String,
    root: ObjectNode,
    workflow: ObjectNode,
    tasks: NamedObjectContainer,
}

impl Workflow {
    /// Workflow in the standard `workflow` namespace.
    pub async fn new(session: &Session) -> Result<Self, WorkflowError> {
        Self::open(session, WORKFLOW_RULES).await
    }

    pub async fn open(session: &Session, rules: &str) -> Result<Self, WorkflowError> {
        let root = session.root(rules).await?;
        let workflow = root.object(WORKFLOW)?;
        let tasks = root.container(TASK_OBJECT)?;
        Ok(Self {
            rules: rules.to_owned(),
            root,
            workflow,
            tasks,
        })
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn root(&self) -> &ObjectNode {
        &self.root
    }

    /// Replace the current tree with a fresh one of `workflow_type`.
    pub async fn initialize(&self, workflow_type: &str) -> Result<Vec<Task>, WorkflowError> {
        let mut args = Map::new();
        args.insert("WorkflowType".into(), Value::String(workflow_type.to_owned()));
        self.workflow.execute("InitializeWorkflow", args).await?;
        let top = self.ordered_children().await?;
        info!(rules = %self.rules, workflow_type, tasks = top.len(), "workflow initialized");
        Ok(top)
    }

    async fn tree(&self) -> Result<TreeSnapshot, WorkflowError> {
        let state = self.root.get_state(false).await?;
        TreeSnapshot::from_value(&state)
    }

    fn handle(&self, id: &str) -> Result<Task, WorkflowError> {
        Task::new(id, &self.tasks)
    }

    fn handles(&self, ids: &[String]) -> Result<Vec<Task>, WorkflowError> {
        ids.iter().map(|id| self.handle(id)).collect()
    }

    // ── Lookup ───────────────────────────────────────────────────

    /// Top-level tasks in workflow order.
    pub async fn ordered_children(&self) -> Result<Vec<Task>, WorkflowError> {
        let tree = self.tree().await?;
        self.handles(&tree.top)
    }

    /// Every task, depth first in workflow order.
    pub async fn all_tasks(&self) -> Result<Vec<Task>, WorkflowError> {
        let tree = self.tree().await?;
        self.handles(&tree.walk())
    }

    /// Task by id (`TaskObject3`).
    pub async fn task(&self, id: &str) -> Result<Task, WorkflowError> {
        let tree = self.tree().await?;
        tree.get(id)?;
        self.handle(id)
    }

    /// First task, in workflow order, whose display name is `name`.
    pub async fn find_task(&self, name: &str) -> Result<Task, WorkflowError> {
        let tree = self.tree().await?;
        let id = tree
            .walk()
            .into_iter()
            .find(|id| tree.tasks.get(id).is_some_and(|t| t.name == name))
            .ok_or_else(|| unknown(name))?;
        self.handle(&id)
    }

    /// First task, in workflow order, bound to `command`.
    pub async fn find_task_by_command(&self, command: &str) -> Result<Task, WorkflowError> {
        let tree = self.tree().await?;
        let id = tree
            .walk()
            .into_iter()
            .find(|id| tree.tasks.get(id).is_some_and(|t| t.command_name == command))
            .ok_or_else(|| unknown(command))?;
        self.handle(&id)
    }

    /// Remove tasks (and their children) from the workflow.
    pub async fn delete_tasks<S: AsRef<str> + Sync>(&self, ids: &[S]) -> Result<(), WorkflowError> {
        let tree = self.tree().await?;
        for id in ids {
            tree.get(id.as_ref())?;
        }
        let list: Vec<Value> = ids
            .iter()
            .map(|id| Value::String(id.as_ref().to_owned()))
            .collect();
        let mut args = Map::new();
        args.insert("ListOfTasks".into(), Value::Array(list));
        // The server drops the children too; their subscriptions go with them.
        let doomed = tree.subtrees(ids);
        self.workflow.execute("DeleteTasks", args).await?;

        for id in &doomed {
            let released = self.tasks.object(id)?.release_deleted().await;
            debug!(task = %id, released, "deleted task released");
        }
        Ok(())
    }

    // ── Dependencies ─────────────────────────────────────────────

    /// Siblings producing something `task` requires.
    pub async fn get_direct_upstream_tasks(&self, task: &Task) -> Result<Vec<Task>, WorkflowError> {
        let (tree, siblings) = self.scope_of(task.id()).await?;
        let graph = tree.graph(&siblings)?;
        self.handles(&graph.upstream(task.id()))
    }

    /// Siblings requiring something `task` produces.
    pub async fn get_direct_downstream_tasks(
        &self,
        task: &Task,
    ) -> Result<Vec<Task>, WorkflowError> {
        let (tree, siblings) = self.scope_of(task.id()).await?;
        let graph = tree.graph(&siblings)?;
        self.handles(&graph.downstream(task.id()))
    }

    async fn scope_of(&self, id: &str) -> Result<(TreeSnapshot, Vec<String>), WorkflowError> {
        let tree = self.tree().await?;
        tree.get(id)?;
        let siblings = tree
            .siblings_of(id)
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec![id.to_owned()]);
        Ok((tree, siblings))
    }

    // ── Execution ────────────────────────────────────────────────

    /// Run the whole tree. Each sibling scope runs in dependency order; a
    /// task runs before its active children. Stops at the first task that
    /// reports errors.
    pub async fn execute_all(&self) -> Result<ExecutionReport, WorkflowError> {
        let tree = self.tree().await?;
        let mut report = ExecutionReport::default();
        self.run_scope(tree.top, &mut report).await?;
        info!(
            rules = %self.rules,
            executed = report.executed().len(),
            stopped_at = ?report.stopped_at,
            "workflow run finished"
        );
        Ok(report)
    }

    /// Returns false once the run has stopped.
    fn run_scope<'a>(
        &'a self,
        ids: Vec<String>,
        report: &'a mut ExecutionReport,
    ) -> BoxFuture<'a, Result<bool, WorkflowError>> {
        async move {
            let tree = self.tree().await?;
            let order = tree.graph(&ids)?.execution_order()?;
            for id in order {
                let task = self.handle(&id)?;
                let kind = tree.get(&id)?.kind(&id)?;
                if kind.is_executable() {
                    let outcome = task.execute().await?;
                    let failed = !outcome.errors.is_empty();
                    report.outcomes.push(outcome);
                    if failed {
                        warn!(task = %id, "workflow run stopped on task errors");
                        report.stopped_at = Some(id);
                        return Ok(false);
                    }
                }
                let children = task.snapshot().await?.active_children();
                if !children.is_empty() && !self.run_scope(children, report).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        .boxed()
    }
}
