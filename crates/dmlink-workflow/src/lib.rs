//! Guided workflows on top of the `dmlink-core` proxy graph.
//!
//! - **[`Workflow`]**: The task tree of one session: initialize it from a
//!   workflow type, look tasks up, delete them, run everything in
//!   dependency order with [`Workflow::execute_all`].
//!
//! - **[`Task`]**: One task object. Its [`TaskType`] decides what it can
//!   do; [`Task::execute`] follows the Out-of-date / Up-to-date state
//!   machine and reports validation failures in a [`TaskOutcome`].
//!
//! - **[`DependencyGraph`]**: Producer/consumer edges between sibling
//!   tasks, derived from their declared inputs and outputs.
//!
//! - **[`demo`]**: A workflow server built on the in-memory datamodel.

pub mod demo;
pub mod error;
pub mod graph;
pub mod task;
pub mod workflow;

pub use error::WorkflowError;
pub use graph::{DependencyGraph, TaskNode};
pub use task::{Task, TaskOutcome, TaskSnapshot, TaskState, TaskType};
pub use workflow::{ExecutionReport, WORKFLOW_RULES, Workflow};
