//! Workflow subcommand handlers.

use serde::Serialize;
use tabled::Tabled;

use dmlink_core::Session;
use dmlink_workflow::{Task, TaskOutcome, TaskState, Workflow};

use crate::cli::{GlobalOpts, WorkflowArgs, WorkflowCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Rows ─────────────────────────────────────────────────────────────

/// One task as listed. `depth` is the nesting level in the tree.
#[derive(Debug, Serialize)]
struct TaskEntry {
    id: String,
    name: String,
    #[serde(rename = "type")]
    task_type: String,
    state: String,
    errors: Vec<String>,
    depth: usize,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "Type")]
    task_type: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Errors")]
    errors: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "Ran")]
    ran: &'static str,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Errors")]
    errors: String,
}

fn task_row(entry: &TaskEntry, color: bool) -> TaskRow {
    let state = entry
        .state
        .parse::<TaskState>()
        .map_or_else(|_| entry.state.clone(), |s| output::paint_state(s, color));
    TaskRow {
        id: entry.id.clone(),
        name: format!("{}{}", "  ".repeat(entry.depth), entry.name),
        task_type: entry.task_type.clone(),
        state,
        errors: output::paint_errors(&entry.errors, color),
    }
}

fn outcome_row(outcome: &TaskOutcome, color: bool) -> OutcomeRow {
    OutcomeRow {
        id: outcome.task.clone(),
        name: outcome.name.clone(),
        ran: if outcome.ran { "yes" } else { "no" },
        state: output::paint_state(outcome.state, color),
        errors: output::paint_errors(&outcome.errors, color),
    }
}

// ── Tree listing ─────────────────────────────────────────────────────

async fn collect_entries(workflow: &Workflow) -> Result<Vec<TaskEntry>, CliError> {
    let mut entries = Vec::new();
    let mut pending: Vec<(Task, usize)> = workflow
        .ordered_children()
        .await?
        .into_iter()
        .rev()
        .map(|task| (task, 0))
        .collect();

    while let Some((task, depth)) = pending.pop() {
        let snapshot = task.snapshot().await?;
        for child in task.ordered_children().await?.into_iter().rev() {
            pending.push((child, depth + 1));
        }
        entries.push(TaskEntry {
            id: task.id().to_owned(),
            name: snapshot.name,
            task_type: snapshot.task_type,
            state: snapshot.state,
            errors: snapshot.errors,
            depth,
        });
    }
    Ok(entries)
}

async fn print_tasks(tasks: &[Task], global: &GlobalOpts) -> Result<(), CliError> {
    let mut entries = Vec::with_capacity(tasks.len());
    for task in tasks {
        let snapshot = task.snapshot().await?;
        entries.push(TaskEntry {
            id: task.id().to_owned(),
            name: snapshot.name,
            task_type: snapshot.task_type,
            state: snapshot.state,
            errors: snapshot.errors,
            depth: 0,
        });
    }
    let color = output::should_color(&global.color);
    let out = output::render_list(&global.output, &entries, |e| task_row(e, color), |e| e.id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: WorkflowArgs, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let workflow = Workflow::open(session, &session.config().default_rules).await?;
    let color = output::should_color(&global.color);

    match args.command {
        WorkflowCommand::Tasks => {
            let entries = collect_entries(&workflow).await?;
            let out = output::render_list(
                &global.output,
                &entries,
                |e| task_row(e, color),
                |e| e.id.clone(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        WorkflowCommand::Init { workflow_type } => {
            let tasks = workflow.initialize(&workflow_type).await?;
            if !global.quiet {
                eprintln!("Initialized '{workflow_type}' with {} top-level tasks", tasks.len());
            }
            print_tasks(&tasks, global).await
        }

        WorkflowCommand::Execute {
            task: Some(identifier),
        } => {
            let task = util::resolve_task(&workflow, &identifier).await?;
            let outcome = task.execute().await?;
            let out = output::render_list(
                &global.output,
                std::slice::from_ref(&outcome),
                |o| outcome_row(o, color),
                |o| o.state.to_string(),
            );
            output::print_output(&out, global.quiet);
            if outcome.is_success() {
                Ok(())
            } else {
                Err(CliError::TaskFailed {
                    task: outcome.name,
                    errors: outcome.errors.join("\n"),
                })
            }
        }

        WorkflowCommand::Execute { task: None } => {
            let report = workflow.execute_all().await?;
            let out = output::render_list(
                &global.output,
                &report.outcomes,
                |o| outcome_row(o, color),
                |o| o.task.clone(),
            );
            output::print_output(&out, global.quiet);
            match report.stopped_at {
                None => Ok(()),
                Some(id) => {
                    let errors = report
                        .outcomes
                        .iter()
                        .find(|o| o.task == id)
                        .map(|o| o.errors.join("\n"))
                        .unwrap_or_default();
                    Err(CliError::TaskFailed { task: id, errors })
                }
            }
        }

        WorkflowCommand::SetArgs { task, value } => {
            let task = util::resolve_task(&workflow, &task).await?;
            let value = util::parse_json_object("value", &value)?;
            task.set_arguments(serde_json::Value::Object(value)).await?;
            if !global.quiet {
                eprintln!("Updated arguments of {}", task.id());
            }
            Ok(())
        }

        WorkflowCommand::Upstream { task } => {
            let task = util::resolve_task(&workflow, &task).await?;
            let upstream = workflow.get_direct_upstream_tasks(&task).await?;
            print_tasks(&upstream, global).await
        }

        WorkflowCommand::Downstream { task } => {
            let task = util::resolve_task(&workflow, &task).await?;
            let downstream = workflow.get_direct_downstream_tasks(&task).await?;
            print_tasks(&downstream, global).await
        }
    }
}
