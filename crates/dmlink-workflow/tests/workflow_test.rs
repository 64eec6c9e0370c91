// Workflow tests against the in-process workflow server.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};

use dmlink_api::{DatamodelRpc, EventPayload};
use dmlink_core::{InMemoryDatamodel, Readable, Session, SessionConfig};
use dmlink_workflow::demo::{demo_datamodel, workflow_schema};
use dmlink_workflow::{Task, TaskState, TaskType, WORKFLOW_RULES, Workflow, WorkflowError};

// ── Helpers ─────────────────────────────────────────────────────────

const WATERTIGHT: &str = "Watertight Geometry";

fn session_over(dm: &Arc<InMemoryDatamodel>) -> Session {
    let rpc: Arc<dyn DatamodelRpc> = dm.clone();
    Session::with_rpc(rpc, SessionConfig::local().with_rules(WORKFLOW_RULES))
}

async fn watertight() -> (Arc<InMemoryDatamodel>, Workflow) {
    let dm = Arc::new(demo_datamodel());
    let workflow = Workflow::new(&session_over(&dm)).await.unwrap();
    workflow.initialize(WATERTIGHT).await.unwrap();
    (dm, workflow)
}

fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(Task::id).collect()
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

// ── Tree ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_initialize_builds_ordered_tree() {
    let (_dm, workflow) = watertight().await;

    let top = workflow.ordered_children().await.unwrap();
    assert_eq!(
        ids(&top),
        vec![
            "TaskObject1",
            "TaskObject2",
            "TaskObject3",
            "TaskObject4",
            "TaskObject7",
            "TaskObject8",
            "TaskObject9",
            "TaskObject10",
            "TaskObject11",
        ]
    );
    assert_eq!(top[0].display_name().await.unwrap(), "Import Geometry");
    assert_eq!(top[0].index(), Some(1));
    assert_eq!(top[1].task_type().await.unwrap(), TaskType::Compound);

    let describe = workflow.find_task("Describe Geometry").await.unwrap();
    assert_eq!(describe.id(), "TaskObject4");
    assert_eq!(describe.task_type().await.unwrap(), TaskType::Conditional);
    assert_eq!(
        ids(&describe.ordered_children().await.unwrap()),
        vec!["TaskObject5", "TaskObject6"]
    );
    assert_eq!(ids(&describe.inactive_children().await.unwrap()), vec!["TaskObject6"]);

    // Only conditional tasks report inactive children.
    assert!(top[0].inactive_children().await.unwrap().is_empty());
    assert_eq!(workflow.all_tasks().await.unwrap().len(), 11);
}

#[tokio::test]
async fn test_reinitialize_replaces_tree() {
    let (_dm, workflow) = watertight().await;
    let top = workflow.initialize("2D Meshing").await.unwrap();
    assert_eq!(top.len(), 5);
    assert_eq!(workflow.all_tasks().await.unwrap().len(), 5);
    assert_eq!(
        top[0].display_name().await.unwrap(),
        "Load CAD Geometry"
    );
}

#[tokio::test]
async fn test_unknown_workflow_type_is_rejected() {
    let (_dm, workflow) = watertight().await;
    let err = workflow.initialize("Hexcore Meshing").await.unwrap_err();
    let core = err.as_core().unwrap();
    assert!(core.is_remote_rejection());
    assert!(err.to_string().contains("Unknown workflow type 'Hexcore Meshing'"));
    // The old tree is untouched.
    assert_eq!(workflow.ordered_children().await.unwrap().len(), 9);
}

#[tokio::test]
async fn test_lookup_failures() {
    let (_dm, workflow) = watertight().await;

    let err = workflow.task("TaskObject99").await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownTask { ref task } if task == "TaskObject99"));

    let err = workflow.find_task("Import Mesh").await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownTask { .. }));

    let by_command = workflow.find_task_by_command("CreateRegions").await.unwrap();
    assert_eq!(by_command.id(), "TaskObject8");
    assert_eq!(workflow.task("TaskObject8").await.unwrap(), by_command);
}

// ── State machine ───────────────────────────────────────────────────

#[tokio::test]
async fn test_execute_moves_task_up_to_date_once() {
    let (dm, workflow) = watertight().await;
    let import = workflow.find_task("Import Geometry").await.unwrap();

    assert_eq!(import.state().await.unwrap(), TaskState::OutOfDate);
    assert!(import.errors().await.unwrap().is_empty());

    import
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();
    let outcome = import.execute().await.unwrap();
    assert!(outcome.ran);
    assert!(outcome.is_success());
    assert_eq!(outcome.state, TaskState::UpToDate);
    assert_eq!(outcome.name, "Import Geometry");

    let before = dm.calls().execute_command;
    let again = import.execute().await.unwrap();
    assert!(!again.ran);
    assert_eq!(again.state, TaskState::UpToDate);
    assert!(again.errors.is_empty());
    assert_eq!(dm.calls().execute_command, before);
}

#[tokio::test]
async fn test_validation_failure_is_reported_not_raised() {
    let (dm, workflow) = watertight().await;
    let import = workflow.task("TaskObject1").await.unwrap();

    let outcome = import.execute().await.unwrap();
    assert!(outcome.ran);
    assert_eq!(outcome.state, TaskState::OutOfDate);
    assert_eq!(outcome.errors, vec!["Missing argument 'FileName'".to_owned()]);

    // Errors block another run until the arguments change.
    let before = dm.calls().execute_command;
    let blocked = import.execute().await.unwrap();
    assert!(!blocked.ran);
    assert_eq!(dm.calls().execute_command, before);

    import
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();
    assert!(import.errors().await.unwrap().is_empty());
    assert!(import.execute().await.unwrap().is_success());
}

#[tokio::test]
async fn test_missing_inputs_are_reported() {
    let (_dm, workflow) = watertight().await;
    let surface = workflow.find_task("Generate the Surface Mesh").await.unwrap();
    let outcome = surface.execute().await.unwrap();
    assert_eq!(
        outcome.errors,
        vec![
            "Missing input 'geometry'".to_owned(),
            "Missing input 'local_sizing'".to_owned(),
        ]
    );
}

#[tokio::test]
async fn test_composite_task_is_not_executable() {
    let dm = Arc::new(demo_datamodel());
    let workflow = Workflow::new(&session_over(&dm)).await.unwrap();
    workflow.initialize("Fault-tolerant Meshing").await.unwrap();

    let group = workflow.find_task("Flow Setup").await.unwrap();
    assert_eq!(group.task_type().await.unwrap(), TaskType::Composite);
    let err = group.execute().await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotExecutable { ref task } if task == group.id()));
}

#[tokio::test]
async fn test_task_without_command_binding() {
    let dm = Arc::new(
        InMemoryDatamodel::new()
            .with_namespace(WORKFLOW_RULES, workflow_schema())
            .with_state(
                WORKFLOW_RULES,
                "TaskObject",
                json!({ "TaskObject1": { "_name_": "Loose", "TaskType": "Simple", "State": "Out-of-date" } }),
            )
            .unwrap(),
    );
    let workflow = Workflow::new(&session_over(&dm)).await.unwrap();
    let task = workflow.task("TaskObject1").await.unwrap();
    let err = task.execute().await.unwrap_err();
    assert!(matches!(err, WorkflowError::MissingCommand { .. }));
    assert_eq!(dm.calls().execute_command, 0);
}

#[tokio::test]
async fn test_state_change_callback() {
    let (_dm, workflow) = watertight().await;
    let import = workflow.task("TaskObject1").await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let subscription = {
        let seen = Arc::clone(&seen);
        import
            .on_state_changed(move |state| seen.lock().unwrap().push(state))
            .await
            .unwrap()
    };
    assert_eq!(subscription.tag(), "/workflow/modified/TaskObject:TaskObject1/State");

    import
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();
    import.execute().await.unwrap();

    eventually(async || !seen.lock().unwrap().is_empty()).await;
    assert_eq!(*seen.lock().unwrap(), vec![TaskState::UpToDate]);
}

// ── Arguments ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_arguments_view_cannot_write() {
    let (dm, workflow) = watertight().await;
    let import = workflow.task("TaskObject1").await.unwrap();
    import
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();

    let view = import.arguments().unwrap();
    assert_eq!(
        view.get_state(false).await.unwrap(),
        json!({ "FileName": "pipe.scdoc" })
    );

    let before = dm.calls().set_state;
    let err = view.set_state(json!({ "FileName": "other.scdoc" })).await.unwrap_err();
    assert!(err.is_read_only_violation());
    assert_eq!(dm.calls().set_state, before);
}

// ── Tree edits ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_child_to_compound_task() {
    let (_dm, workflow) = watertight().await;

    let import = workflow.task("TaskObject1").await.unwrap();
    let err = import.add_child(None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnsupportedOperation { ref operation, .. } if operation == "add_child"));

    let sizing = workflow.find_task("Add Local Sizing").await.unwrap();
    let child = sizing
        .add_child(Some(args(json!({ "Name": "facesize_1", "Size": 2 }))))
        .await
        .unwrap();
    assert_eq!(child.id(), "TaskObject12");
    assert_eq!(child.display_name().await.unwrap(), "facesize_1");
    assert_eq!(child.task_type().await.unwrap(), TaskType::Simple);
    assert_eq!(
        child.arguments().unwrap().get_state(false).await.unwrap(),
        json!({ "Name": "facesize_1", "Size": 2 })
    );
    assert_eq!(ids(&sizing.ordered_children().await.unwrap()), vec!["TaskObject12"]);

    let second = sizing.add_child(None).await.unwrap();
    assert_eq!(second.id(), "TaskObject13");
    assert_eq!(
        ids(&sizing.ordered_children().await.unwrap()),
        vec!["TaskObject12", "TaskObject13"]
    );
}

#[tokio::test]
async fn test_insert_next_task() {
    let (_dm, workflow) = watertight().await;
    let regions = workflow.find_task("Update Regions").await.unwrap();

    let inserted = regions.insert_next_task("DefineGlobalSizing").await.unwrap();
    assert_eq!(inserted.id(), "TaskObject12");
    assert_eq!(inserted.display_name().await.unwrap(), "Define Global Sizing");

    let top = workflow.ordered_children().await.unwrap();
    let at = ids(&top).iter().position(|id| *id == "TaskObject9").unwrap();
    assert_eq!(top[at + 1].id(), "TaskObject12");

    let err = regions.insert_next_task("Teleport").await.unwrap_err();
    assert!(err.as_core().unwrap().is_remote_rejection());
}

#[tokio::test]
async fn test_delete_tasks_removes_children_and_subscriptions() {
    let dm = Arc::new(demo_datamodel());
    let session = session_over(&dm);
    let workflow = Workflow::new(&session).await.unwrap();
    workflow.initialize(WATERTIGHT).await.unwrap();
    for id in ["TaskObject4", "TaskObject5"] {
        let task = workflow.task(id).await.unwrap();
        task.on_state_changed(|_| {}).await.unwrap();
    }
    assert_eq!(dm.active_tags().len(), 2);

    workflow.delete_tasks(&["TaskObject4"]).await.unwrap();

    assert!(!ids(&workflow.ordered_children().await.unwrap()).contains(&"TaskObject4"));
    for gone in ["TaskObject4", "TaskObject5", "TaskObject6"] {
        assert!(matches!(
            workflow.task(gone).await.unwrap_err(),
            WorkflowError::UnknownTask { .. }
        ));
    }
    assert_eq!(workflow.all_tasks().await.unwrap().len(), 8);
    assert!(session.registry().active_tags().await.is_empty());
    assert!(dm.active_tags().is_empty());

    let err = workflow.delete_tasks(&["TaskObject99"]).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownTask { .. }));
}

#[tokio::test]
async fn test_deleted_tasks_notify_their_subscribers() {
    let dm = Arc::new(demo_datamodel());
    let session = session_over(&dm);
    let workflow = Workflow::new(&session).await.unwrap();
    workflow.initialize(WATERTIGHT).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for id in ["TaskObject4", "TaskObject5"] {
        let seen = Arc::clone(&seen);
        let task = workflow.task(id).await.unwrap();
        task.node()
            .on_deleted(move |event| {
                if let EventPayload::Deleted { paths } = &event.payload {
                    seen.lock().unwrap().extend(paths.iter().cloned());
                }
            })
            .await
            .unwrap();
    }

    workflow.delete_tasks(&["TaskObject4"]).await.unwrap();

    eventually(async || seen.lock().unwrap().len() == 2).await;
    let mut paths = seen.lock().unwrap().clone();
    paths.sort();
    assert_eq!(paths, vec!["TaskObject:TaskObject4", "TaskObject:TaskObject5"]);
    eventually(async || session.registry().active_tags().await.is_empty()).await;
    assert!(dm.active_tags().is_empty());
}

// ── Dependencies ────────────────────────────────────────────────────

#[tokio::test]
async fn test_direct_upstream_and_downstream() {
    let task = |outputs: Value, required: Value| {
        json!({
            "TaskType": "Simple",
            "State": "Out-of-date",
            "CommandName": "Run",
            "Outputs": outputs,
            "RequiredInputs": required,
        })
    };
    let dm = Arc::new(
        InMemoryDatamodel::new()
            .with_namespace(WORKFLOW_RULES, workflow_schema())
            .with_state(
                WORKFLOW_RULES,
                "TaskObject",
                json!({
                    "T1": task(json!(["mesh"]), json!([])),
                    "T2": task(json!(["solution"]), json!(["mesh", "region"])),
                    "T3": task(json!(["report"]), json!(["case"])),
                }),
            )
            .unwrap()
            .with_state(WORKFLOW_RULES, "Workflow", json!({ "TaskList": ["T1", "T2", "T3"] }))
            .unwrap(),
    );
    let workflow = Workflow::new(&session_over(&dm)).await.unwrap();
    let t1 = workflow.task("T1").await.unwrap();
    let t2 = workflow.task("T2").await.unwrap();
    let t3 = workflow.task("T3").await.unwrap();

    assert_eq!(ids(&workflow.get_direct_upstream_tasks(&t2).await.unwrap()), vec!["T1"]);
    assert_eq!(ids(&workflow.get_direct_downstream_tasks(&t1).await.unwrap()), vec!["T2"]);
    assert!(workflow.get_direct_upstream_tasks(&t3).await.unwrap().is_empty());
    assert!(workflow.get_direct_downstream_tasks(&t3).await.unwrap().is_empty());
    assert!(workflow.get_direct_upstream_tasks(&t1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dependencies_stay_within_sibling_scope() {
    let (_dm, workflow) = watertight().await;
    let volume = workflow.find_task("Generate the Volume Mesh").await.unwrap();
    assert_eq!(
        ids(&workflow.get_direct_upstream_tasks(&volume).await.unwrap()),
        vec!["TaskObject9", "TaskObject10"]
    );

    // The capping branch needs what Describe Geometry outputs, but it is a
    // child, not a sibling.
    let describe = workflow.task("TaskObject4").await.unwrap();
    assert!(workflow.get_direct_downstream_tasks(&describe).await.unwrap().is_empty());

    let capping = workflow.task("TaskObject5").await.unwrap();
    assert!(workflow.get_direct_upstream_tasks(&capping).await.unwrap().is_empty());
}

// ── Whole-workflow runs ─────────────────────────────────────────────

#[tokio::test]
async fn test_execute_all_stops_at_first_error() {
    let (_dm, workflow) = watertight().await;
    let report = workflow.execute_all().await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.stopped_at.as_deref(), Some("TaskObject1"));
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(
        workflow.task("TaskObject2").await.unwrap().state().await.unwrap(),
        TaskState::OutOfDate
    );
}

#[tokio::test]
async fn test_execute_all_runs_in_dependency_order() {
    let (_dm, workflow) = watertight().await;
    workflow
        .task("TaskObject1")
        .await
        .unwrap()
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();

    let report = workflow.execute_all().await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.executed(),
        vec![
            "TaskObject1",
            "TaskObject2",
            "TaskObject3",
            "TaskObject4",
            "TaskObject5",
            "TaskObject7",
            "TaskObject8",
            "TaskObject9",
            "TaskObject10",
            "TaskObject11",
        ]
    );
    // The inactive branch never ran.
    assert_eq!(
        workflow.task("TaskObject6").await.unwrap().state().await.unwrap(),
        TaskState::OutOfDate
    );

    // A second run finds everything up to date.
    let rerun = workflow.execute_all().await.unwrap();
    assert!(rerun.is_success());
    assert!(rerun.executed().is_empty());
}

#[tokio::test]
async fn test_execute_all_follows_selected_branch() {
    let (_dm, workflow) = watertight().await;
    workflow
        .task("TaskObject1")
        .await
        .unwrap()
        .set_arguments(json!({ "FileName": "pipe.scdoc" }))
        .await
        .unwrap();
    let describe = workflow.task("TaskObject4").await.unwrap();
    describe
        .set_arguments(json!({ "CappingRequired": "No" }))
        .await
        .unwrap();

    let report = workflow.execute_all().await.unwrap();
    assert!(report.is_success());
    let executed = report.executed();
    assert!(executed.contains(&"TaskObject6"));
    assert!(!executed.contains(&"TaskObject5"));
    assert_eq!(ids(&describe.inactive_children().await.unwrap()), vec!["TaskObject5"]);
}

#[tokio::test]
async fn test_execute_all_recurses_through_composite_tasks() {
    let dm = Arc::new(demo_datamodel());
    let workflow = Workflow::new(&session_over(&dm)).await.unwrap();
    workflow.initialize("Fault-tolerant Meshing").await.unwrap();
    workflow
        .find_task("Import CAD and Part Management")
        .await
        .unwrap()
        .set_arguments(json!({ "FileName": "manifold.pmdb" }))
        .await
        .unwrap();

    let report = workflow.execute_all().await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.executed(),
        vec![
            "TaskObject1",
            "TaskObject2",
            "TaskObject4",
            "TaskObject5",
            "TaskObject6",
            "TaskObject7",
        ]
    );
}
