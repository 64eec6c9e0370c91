// Data dependencies between sibling tasks.
//
// Task S feeds task T when something S outputs is among T's required
// inputs. Only siblings are related; a task never depends on itself.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::WorkflowError;
use crate::task::TaskSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub required_inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl TaskNode {
    pub fn new<I, O, S>(id: &str, required_inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_owned(),
            required_inputs: required_inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_snapshot(id: &str, snapshot: &TaskSnapshot) -> Self {
        Self {
            id: id.to_owned(),
            required_inputs: snapshot.required_set(),
            outputs: snapshot.output_set(),
        }
    }

    fn feeds(&self, other: &TaskNode) -> bool {
        self.id != other.id && !self.outputs.is_disjoint(&other.required_inputs)
    }
}

/// Sibling tasks in workflow order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<TaskNode>,
}

impl DependencyGraph {
    pub fn new(nodes: Vec<TaskNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Siblings whose outputs `id` requires, in workflow order.
    pub fn upstream(&self, id: &str) -> Vec<String> {
        let Some(target) = self.node(id) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| n.feeds(target))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Siblings that require something `id` outputs, in workflow order.
    pub fn downstream(&self, id: &str) -> Vec<String> {
        let Some(source) = self.node(id) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|n| source.feeds(n))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every task after all of its upstream tasks. Among tasks that are
    /// ready at the same time, workflow order wins.
    pub fn execution_order(&self) -> Result<Vec<String>, WorkflowError> {
        let mut pending: BTreeMap<usize, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (i, self.nodes.iter().filter(|n| n.feeds(node)).count()))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = pending
            .iter()
            .find_map(|(&i, &waiting)| (waiting == 0).then_some(i))
        {
            pending.remove(&next);
            let done = &self.nodes[next];
            for (&i, waiting) in &mut pending {
                if done.feeds(&self.nodes[i]) {
                    *waiting -= 1;
                }
            }
            order.push(done.id.clone());
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            Err(WorkflowError::DependencyCycle {
                tasks: pending.keys().map(|&i| self.nodes[i].id.clone()).collect(),
            })
        }
    }
}
