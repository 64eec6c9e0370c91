// ── In-process workflow server ──
//
// A `workflow` namespace on top of `InMemoryDatamodel` with the command
// bodies a meshing server would run: workflow templates, argument and
// input checks on Execute, child tasks, insertion and deletion. Used by the
// tests and by the CLI's `memory://` backend.

use std::collections::BTreeSet;

use dmlink_api::CommandInfo;
use dmlink_core::{CommandContext, DatamodelPath, InMemoryDatamodel, PathSegment, TypeInfo, ValueType};
use serde_json::{Map, Value, json};

use crate::task::{TASK_OBJECT, TaskSnapshot, TaskState, TaskType};
use crate::workflow::WORKFLOW_RULES;

// ── Templates ────────────────────────────────────────────────────

/// One task of a workflow template.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub name: &'static str,
    pub command: &'static str,
    pub kind: TaskType,
    pub required_inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    /// Arguments Execute refuses to run without.
    pub arguments: &'static [&'static str],
    /// Conditional tasks: argument that flips the active branch when "No".
    pub switch: Option<&'static str>,
    pub children: &'static [TaskSpec],
    /// Children that start out inactive.
    pub inactive: &'static [&'static str],
}

impl TaskSpec {
    const fn simple(
        name: &'static str,
        command: &'static str,
        required_inputs: &'static [&'static str],
        outputs: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            command,
            kind: TaskType::Simple,
            required_inputs,
            outputs,
            arguments: &[],
            switch: None,
            children: &[],
            inactive: &[],
        }
    }

    const fn kind(self, kind: TaskType) -> Self {
        Self { kind, ..self }
    }

    const fn arguments(self, arguments: &'static [&'static str]) -> Self {
        Self { arguments, ..self }
    }

    const fn branches(
        self,
        switch: &'static str,
        children: &'static [TaskSpec],
        inactive: &'static [&'static str],
    ) -> Self {
        Self {
            kind: TaskType::Conditional,
            switch: Some(switch),
            children,
            inactive,
            ..self
        }
    }

    const fn group(name: &'static str, children: &'static [TaskSpec]) -> Self {
        Self {
            kind: TaskType::Composite,
            children,
            ..Self::simple(name, "", &[], &[])
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowTemplate {
    pub name: &'static str,
    pub tasks: &'static [TaskSpec],
}

const CAPPING_BRANCHES: &[TaskSpec] = &[
    TaskSpec::simple(
        "Enclose Fluid Regions (Capping)",
        "Capping",
        &["geometry_type"],
        &["capping"],
    ),
    TaskSpec::simple(
        "Apply Share Topology",
        "ApplyShareTopology",
        &["geometry_type"],
        &["shared_topology"],
    ),
];

const WATERTIGHT: &[TaskSpec] = &[
    TaskSpec::simple("Import Geometry", "ImportGeometry", &[], &["geometry"])
        .arguments(&["FileName"]),
    TaskSpec::simple("Add Local Sizing", "AddLocalSizing", &["geometry"], &["local_sizing"])
        .kind(TaskType::Compound),
    TaskSpec::simple(
        "Generate the Surface Mesh",
        "GenerateSurfaceMesh",
        &["geometry", "local_sizing"],
        &["surface_mesh"],
    ),
    TaskSpec::simple(
        "Describe Geometry",
        "DescribeGeometry",
        &["surface_mesh"],
        &["geometry_type"],
    )
    .branches("CappingRequired", CAPPING_BRANCHES, &["Apply Share Topology"]),
    TaskSpec::simple("Update Boundaries", "UpdateBoundaries", &["surface_mesh"], &["boundaries"]),
    TaskSpec::simple("Create Regions", "CreateRegions", &["surface_mesh"], &["regions"]),
    TaskSpec::simple("Update Regions", "UpdateRegions", &["regions"], &["region_settings"]),
    TaskSpec::simple(
        "Add Boundary Layers",
        "AddBoundaryLayers",
        &["regions", "boundaries"],
        &["boundary_layers"],
    )
    .kind(TaskType::Compound),
    TaskSpec::simple(
        "Generate the Volume Mesh",
        "GenerateVolumeMesh",
        &["region_settings", "boundary_layers"],
        &["volume_mesh"],
    ),
];

const FLOW_SETUP: &[TaskSpec] = &[
    TaskSpec::simple(
        "Enclose Fluid Regions",
        "EncloseFluidRegions",
        &["flow_description"],
        &["fluid_regions"],
    ),
    TaskSpec::simple(
        "Create Local Refinement Regions",
        "CreateLocalRefinementRegions",
        &["fluid_regions"],
        &["refinement"],
    ),
];

const FAULT_TOLERANT: &[TaskSpec] = &[
    TaskSpec::simple(
        "Import CAD and Part Management",
        "ImportCadAndPartManagement",
        &[],
        &["cad"],
    )
    .arguments(&["FileName"]),
    TaskSpec::simple(
        "Describe Geometry and Flow",
        "DescribeGeometryAndFlow",
        &["cad"],
        &["flow_description"],
    ),
    TaskSpec::group("Flow Setup", FLOW_SETUP),
    TaskSpec::simple(
        "Generate the Surface Mesh",
        "GenerateSurfaceMeshFtm",
        &["fluid_regions", "refinement"],
        &["surface_mesh"],
    ),
    TaskSpec::simple(
        "Generate the Volume Mesh",
        "GenerateVolumeMeshFtm",
        &["surface_mesh"],
        &["volume_mesh"],
    ),
];

const TWO_DIMENSIONAL: &[TaskSpec] = &[
    TaskSpec::simple("Load CAD Geometry", "LoadCadGeometry", &[], &["geometry_2d"])
        .arguments(&["FileName"]),
    TaskSpec::simple(
        "Update Boundaries",
        "UpdateBoundaries2d",
        &["geometry_2d"],
        &["boundaries_2d"],
    ),
    TaskSpec::simple("Define Global Sizing", "DefineGlobalSizing", &["geometry_2d"], &["sizing_2d"]),
    TaskSpec::simple(
        "Add 2D Boundary Layers",
        "AddBoundaryLayers2d",
        &["boundaries_2d"],
        &["layers_2d"],
    )
    .kind(TaskType::Compound),
    TaskSpec::simple(
        "Generate the Surface Mesh",
        "GenerateSurfaceMesh2d",
        &["sizing_2d", "layers_2d"],
        &["mesh_2d"],
    ),
];

pub const WORKFLOW_TEMPLATES: &[WorkflowTemplate] = &[
    WorkflowTemplate {
        name: "Watertight Geometry",
        tasks: WATERTIGHT,
    },
    WorkflowTemplate {
        name: "Fault-tolerant Meshing",
        tasks: FAULT_TOLERANT,
    },
    WorkflowTemplate {
        name: "2D Meshing",
        tasks: TWO_DIMENSIONAL,
    },
];

/// Task template bound to `command`, from any workflow.
pub fn find_spec(command: &str) -> Option<&'static TaskSpec> {
    fn search(specs: &'static [TaskSpec], command: &str) -> Option<&'static TaskSpec> {
        specs.iter().find_map(|spec| {
            if !spec.command.is_empty() && spec.command == command {
                Some(spec)
            } else {
                search(spec.children, command)
            }
        })
    }
    WORKFLOW_TEMPLATES
        .iter()
        .find_map(|template| search(template.tasks, command))
}

// ── Schema ───────────────────────────────────────────────────────

/// Type information of the `workflow` namespace.
pub fn workflow_schema() -> TypeInfo {
    let workflow = TypeInfo::new()
        .parameter("TaskList", ValueType::StringList)
        .command(
            "InitializeWorkflow",
            CommandInfo::new().argument("WorkflowType", ValueType::String),
        )
        .command(
            "DeleteTasks",
            CommandInfo::new().argument("ListOfTasks", ValueType::StringList),
        );

    let task = TypeInfo::new()
        .parameter("_name_", ValueType::String)
        .parameter("TaskType", ValueType::String)
        .parameter("TaskList", ValueType::StringList)
        .parameter("InactiveTaskList", ValueType::StringList)
        .parameter("State", ValueType::String)
        .parameter("Errors", ValueType::StringList)
        .parameter("CommandName", ValueType::String)
        .parameter("RequiredInputs", ValueType::StringList)
        .parameter("Outputs", ValueType::StringList)
        .parameter("Arguments", ValueType::Dict)
        .command("Execute", CommandInfo::new())
        .command("AddChildToTask", CommandInfo::new())
        .command(
            "InsertNextTask",
            CommandInfo::new().argument("CommandName", ValueType::String),
        );

    TypeInfo::new()
        .singleton("Workflow", workflow)
        .named_object(TASK_OBJECT, task)
}

/// A datamodel serving the `workflow` namespace with all workflow commands.
pub fn demo_datamodel() -> InMemoryDatamodel {
    InMemoryDatamodel::new()
        .with_namespace(WORKFLOW_RULES, workflow_schema())
        .with_handler(WORKFLOW_RULES, "Workflow", "InitializeWorkflow", initialize_workflow)
        .with_handler(WORKFLOW_RULES, "Workflow", "DeleteTasks", delete_tasks)
        .with_handler(WORKFLOW_RULES, TASK_OBJECT, "Execute", execute_task)
        .with_handler(WORKFLOW_RULES, TASK_OBJECT, "AddChildToTask", add_child)
        .with_handler(WORKFLOW_RULES, TASK_OBJECT, "InsertNextTask", insert_next_task)
}

// ── Helpers ──────────────────────────────────────────────────────

type Handled<T> = Result<T, String>;

fn parse_path(raw: &str) -> Handled<DatamodelPath> {
    raw.parse().map_err(|e: dmlink_core::CoreError| e.to_string())
}

fn workflow_path() -> Handled<DatamodelPath> {
    parse_path("Workflow")
}

fn task_path(id: &str) -> Handled<DatamodelPath> {
    parse_path(&format!("{TASK_OBJECT}:{id}"))
}

fn read_task(ctx: &CommandContext<'_>, id: &str) -> Handled<TaskSnapshot> {
    let state = ctx
        .state(&task_path(id)?)
        .ok_or_else(|| format!("No task '{id}'"))?;
    serde_json::from_value(state).map_err(|e| e.to_string())
}

fn task_ids(ctx: &CommandContext<'_>) -> Vec<String> {
    ctx.member_names(&DatamodelPath::root(), TASK_OBJECT)
}

fn top_list(ctx: &CommandContext<'_>) -> Handled<Vec<String>> {
    let state = ctx.state(&workflow_path()?).unwrap_or(Value::Null);
    Ok(strings(state.get("TaskList")))
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn own_id(ctx: &CommandContext<'_>) -> Handled<String> {
    ctx.path()
        .last()
        .and_then(PathSegment::instance)
        .map(str::to_owned)
        .ok_or_else(|| format!("'{}' is not a task", ctx.path()))
}

fn next_index(ctx: &CommandContext<'_>) -> u32 {
    task_ids(ctx)
        .iter()
        .filter_map(|id| id.strip_prefix(TASK_OBJECT)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

/// Write `spec` and its children as new task objects. Returns the new id.
fn create(ctx: &mut CommandContext<'_>, spec: &TaskSpec, next: &mut u32) -> Handled<String> {
    let id = format!("{TASK_OBJECT}{next}");
    *next += 1;

    let mut children = Vec::new();
    let mut inactive = Vec::new();
    for child in spec.children {
        let child_id = create(ctx, child, next)?;
        if spec.inactive.contains(&child.name) {
            inactive.push(child_id.clone());
        }
        children.push(child_id);
    }

    let record = json!({
        "_name_": spec.name,
        "TaskType": spec.kind.to_string(),
        "TaskList": children,
        "InactiveTaskList": inactive,
        "State": TaskState::OutOfDate.to_string(),
        "Errors": [],
        "CommandName": spec.command,
        "RequiredInputs": spec.required_inputs,
        "Outputs": spec.outputs,
        "Arguments": {},
    });
    ctx.set(&task_path(&id)?, record)?;
    Ok(id)
}

/// Remove `id` from every task list that holds it.
fn detach(ctx: &mut CommandContext<'_>, id: &str) -> Handled<()> {
    let top = top_list(ctx)?;
    if top.iter().any(|t| t == id) {
        let kept: Vec<&String> = top.iter().filter(|t| *t != id).collect();
        ctx.set(&workflow_path()?, json!({ "TaskList": kept }))?;
    }
    for other in task_ids(ctx) {
        let task = read_task(ctx, &other)?;
        if task.task_list.iter().chain(&task.inactive_task_list).any(|t| t == id) {
            let without = |list: &[String]| -> Vec<String> {
                list.iter().filter(|t| *t != id).cloned().collect()
            };
            let patch = json!({
                "TaskList": without(&task.task_list),
                "InactiveTaskList": without(&task.inactive_task_list),
            });
            ctx.set(&task_path(&other)?, patch)?;
        }
    }
    Ok(())
}

fn remove(ctx: &mut CommandContext<'_>, id: &str) -> Handled<()> {
    let Ok(task) = read_task(ctx, id) else {
        return Ok(());
    };
    for child in &task.task_list {
        remove(ctx, child)?;
    }
    detach(ctx, id)?;
    ctx.delete(&task_path(id)?)
}

/// Put `new_id` right after `after` in whichever list holds `after`.
fn insert_after(ctx: &mut CommandContext<'_>, after: &str, new_id: &str) -> Handled<()> {
    let splice = |list: &[String]| -> Option<Vec<String>> {
        let at = list.iter().position(|t| t == after)?;
        let mut out = list.to_vec();
        out.insert(at + 1, new_id.to_owned());
        Some(out)
    };

    if let Some(list) = splice(&top_list(ctx)?) {
        return ctx.set(&workflow_path()?, json!({ "TaskList": list }));
    }
    for other in task_ids(ctx) {
        let task = read_task(ctx, &other)?;
        if let Some(list) = splice(&task.task_list) {
            return ctx.set(&task_path(&other)?, json!({ "TaskList": list }));
        }
    }
    Err(format!("Task '{after}' is not in the workflow"))
}

// ── Command bodies ───────────────────────────────────────────────

fn initialize_workflow(ctx: &mut CommandContext<'_>) -> Handled<Value> {
    let kind = ctx
        .arg_str("WorkflowType")
        .map(str::to_owned)
        .ok_or_else(|| "WorkflowType is required".to_owned())?;
    let template = WORKFLOW_TEMPLATES
        .iter()
        .find(|t| t.name == kind)
        .ok_or_else(|| format!("Unknown workflow type '{kind}'"))?;

    for id in task_ids(ctx) {
        ctx.delete(&task_path(&id)?)?;
    }
    let mut next = 1;
    let top = template
        .tasks
        .iter()
        .map(|spec| create(ctx, spec, &mut next))
        .collect::<Handled<Vec<_>>>()?;
    ctx.set(&workflow_path()?, json!({ "TaskList": top }))?;
    Ok(Value::Null)
}

fn delete_tasks(ctx: &mut CommandContext<'_>) -> Handled<Value> {
    let ids = strings(ctx.arg("ListOfTasks"));
    for id in &ids {
        read_task(ctx, id)?;
    }
    for id in &ids {
        remove(ctx, id)?;
    }
    Ok(Value::Null)
}

fn execute_task(ctx: &mut CommandContext<'_>) -> Handled<Value> {
    let id = own_id(ctx)?;
    let task = read_task(ctx, &id)?;
    let spec = find_spec(&task.command_name)
        .ok_or_else(|| format!("Unknown command '{}'", task.command_name))?;

    let mut errors = Vec::new();
    for name in spec.arguments {
        if task.arguments.get(*name).is_none_or(Value::is_null) {
            errors.push(format!("Missing argument '{name}'"));
        }
    }
    let available = produced(ctx)?;
    for input in &task.required_inputs {
        if !available.contains(input) {
            errors.push(format!("Missing input '{input}'"));
        }
    }

    let path = task_path(&id)?;
    if !errors.is_empty() {
        let patch = json!({ "Errors": errors, "State": TaskState::OutOfDate.to_string() });
        ctx.set(&path, patch)?;
        return Ok(Value::Bool(false));
    }

    let mut patch = json!({ "Errors": [], "State": TaskState::UpToDate.to_string() });
    if let Some(inactive) = select_branch(ctx, spec, &task)? {
        patch["InactiveTaskList"] = json!(inactive);
    }
    ctx.set(&path, patch)?;
    Ok(Value::Bool(true))
}

/// Everything up-to-date tasks have produced.
fn produced(ctx: &CommandContext<'_>) -> Handled<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for id in task_ids(ctx) {
        let task = read_task(ctx, &id)?;
        if task.state == TaskState::UpToDate.to_string() {
            out.extend(task.outputs);
        }
    }
    Ok(out)
}

/// Inactive children of a conditional task after it ran.
fn select_branch(
    ctx: &CommandContext<'_>,
    spec: &TaskSpec,
    task: &TaskSnapshot,
) -> Handled<Option<Vec<String>>> {
    let Some(switch) = spec.switch else {
        return Ok(None);
    };
    let flipped = task.arguments.get(switch).and_then(Value::as_str) == Some("No");
    let mut inactive = Vec::new();
    for child in &task.task_list {
        let name = read_task(ctx, child)?.name;
        if spec.inactive.contains(&name.as_str()) != flipped {
            inactive.push(child.clone());
        }
    }
    Ok(Some(inactive))
}

fn add_child(ctx: &mut CommandContext<'_>) -> Handled<Value> {
    let id = own_id(ctx)?;
    let task = read_task(ctx, &id)?;
    if task.task_type != TaskType::Compound.to_string() {
        return Err(format!("Task '{}' cannot have child tasks added", task.name));
    }
    if task.arguments.get("AddChild").and_then(Value::as_str) != Some("yes") {
        return Err(format!("Task '{}' has AddChild unset", task.name));
    }

    let mut arguments: Map<String, Value> = task.arguments.as_object().cloned().unwrap_or_default();
    arguments.remove("AddChild");
    let name = arguments
        .get("Name")
        .and_then(Value::as_str)
        .map_or_else(|| format!("{} {}", task.name, task.task_list.len() + 1), str::to_owned);

    let child_id = format!("{TASK_OBJECT}{}", next_index(ctx));
    let record = json!({
        "_name_": name,
        "TaskType": "Compound Child",
        "State": TaskState::OutOfDate.to_string(),
        "Errors": [],
        "CommandName": task.command_name,
        "RequiredInputs": task.required_inputs,
        "Outputs": task.outputs,
        "Arguments": arguments,
    });
    ctx.set(&task_path(&child_id)?, record)?;

    let mut children = task.task_list.clone();
    children.push(child_id.clone());
    let patch = json!({ "TaskList": children, "Arguments": { "AddChild": "no" } });
    ctx.set(&task_path(&id)?, patch)?;
    Ok(Value::String(child_id))
}

fn insert_next_task(ctx: &mut CommandContext<'_>) -> Handled<Value> {
    let id = own_id(ctx)?;
    let command = ctx
        .arg_str("CommandName")
        .map(str::to_owned)
        .ok_or_else(|| "CommandName is required".to_owned())?;
    let spec = find_spec(&command).ok_or_else(|| format!("Unknown command '{command}'"))?;

    let mut next = next_index(ctx);
    let new_id = create(ctx, spec, &mut next)?;
    insert_after(ctx, &id, &new_id)?;
    Ok(Value::String(new_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn commands_resolve_across_templates() {
        assert_eq!(find_spec("Capping").unwrap().name, "Enclose Fluid Regions (Capping)");
        assert_eq!(find_spec("CreateLocalRefinementRegions").unwrap().outputs, ["refinement"]);
        assert!(find_spec("").is_none());
        assert!(find_spec("Nope").is_none());
    }

    #[test]
    fn every_command_is_bound_once() {
        fn collect(specs: &[TaskSpec], out: &mut Vec<&'static str>) {
            for spec in specs {
                if !spec.command.is_empty() {
                    out.push(spec.command);
                }
                collect(spec.children, out);
            }
        }
        let mut commands = Vec::new();
        for template in WORKFLOW_TEMPLATES {
            collect(template.tasks, &mut commands);
        }
        let unique: BTreeSet<_> = commands.iter().collect();
        assert_eq!(unique.len(), commands.len());
    }

    #[test]
    fn schema_declares_task_members() {
        let schema = workflow_schema();
        let task = &schema.named_objects[TASK_OBJECT];
        assert_eq!(task.parameters["Arguments"].value_type, ValueType::Dict);
        assert!(task.commands.contains_key("InsertNextTask"));
        assert!(schema.singletons["Workflow"].commands.contains_key("DeleteTasks"));
    }
}
