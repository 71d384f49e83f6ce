use serde_json::json;
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracebook_core::{
    Document, Field, LinkOutcome, NodeId, NodeKind, Record, RulePolicy, WorkItemDefinition,
    Workspace, WorkspaceConfig, WorkspaceError,
};

/// Project > (Definitions, Hardware > (System, Subsystem)) with two linked
/// requirement definitions and one item in each requirement document.
struct Sample {
    project: NodeId,
    definitions: NodeId,
    hardware: NodeId,
    system_docs: NodeId,
    subsystem_docs: NodeId,
    system_def: NodeId,
    subsystem_def: NodeId,
    shutdown: NodeId,
    cap_size: NodeId,
}

fn seed(workspace: &mut Workspace) -> Sample {
    let project = workspace.create_new_project("Example Project", None).unwrap().id();
    let definitions = workspace
        .create_new_document("Definitions", Some(project))
        .unwrap()
        .id();
    let hardware = workspace
        .create_new_document("Hardware", Some(project))
        .unwrap()
        .id();
    let system_docs = workspace
        .create_new_document("System Requirements", Some(hardware))
        .unwrap()
        .id();
    let subsystem_docs = workspace
        .create_new_document("Sub-system Requirements", Some(hardware))
        .unwrap()
        .id();

    let system_def = workspace
        .create_new_definition("System Requirement", Some(definitions))
        .unwrap()
        .id();
    let subsystem_def = workspace
        .create_new_definition("Sub-system Requirement", Some(definitions))
        .unwrap()
        .id();
    workspace
        .add_downstream_rule(system_def, subsystem_def, true)
        .unwrap();
    for definition in [system_def, subsystem_def] {
        let mut edit = workspace.edit_definition(definition).unwrap();
        edit.add_public_field(Field::long_text("Requirement", ""));
    }

    let shutdown = workspace
        .create_new_work_item("Shutdown Time", system_def, Some(system_docs))
        .unwrap()
        .id();
    let cap_size = workspace
        .create_new_work_item("Cap Size", subsystem_def, Some(subsystem_docs))
        .unwrap()
        .id();
    workspace.save_all().unwrap();

    Sample {
        project,
        definitions,
        hardware,
        system_docs,
        subsystem_docs,
        system_def,
        subsystem_def,
        shutdown,
        cap_size,
    }
}

fn eager_config() -> WorkspaceConfig {
    WorkspaceConfig {
        lazy_load: false,
        ..WorkspaceConfig::default()
    }
}

fn relative(workspace: &Workspace, id: NodeId) -> String {
    workspace
        .file_path(id)
        .unwrap()
        .strip_prefix(workspace.root())
        .unwrap()
        .to_string_lossy()
        .replace('\\', "/")
}

#[test]
fn created_nodes_are_written_under_their_container_directories() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);

    let p = s.project;
    assert_eq!(relative(&workspace, p), format!("{p}/{p}.bbproj"));
    assert_eq!(
        relative(&workspace, s.hardware),
        format!("{p}/{h}/{h}.bbdoc", h = s.hardware)
    );
    assert_eq!(
        relative(&workspace, s.system_def),
        format!("{p}/{d}/{}.bbdef", s.system_def, d = s.definitions)
    );
    assert_eq!(
        relative(&workspace, s.shutdown),
        format!("{p}/{h}/{d}/{}.bbitem", s.shutdown, h = s.hardware, d = s.system_docs)
    );
    for id in [s.project, s.hardware, s.system_def, s.shutdown] {
        assert!(workspace.file_path(id).unwrap().is_file());
    }

    let project = workspace.project(p).unwrap();
    assert_eq!(project.definitions().len(), 2);
    assert_eq!(project.work_items().len(), 2);
    assert_eq!(project.documents().len(), 4);
    assert!(workspace.document(s.system_docs).unwrap().contains(s.shutdown));
    assert!(workspace.document(s.hardware).unwrap().work_items().is_empty());
}

#[test]
fn hierarchy_rules_are_enforced_on_create() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);

    assert!(matches!(
        workspace.create_new_document("Nested", Some(s.shutdown)),
        Err(WorkspaceError::ParentMustBeContainer(id)) if id == s.shutdown
    ));
    let ghost = uuid::Uuid::new_v4();
    assert!(matches!(
        workspace.create_new_definition("Ghost", Some(ghost)),
        Err(WorkspaceError::ParentNotFound(id)) if id == ghost
    ));
    assert!(matches!(
        workspace.create_new_project("   ", None),
        Err(WorkspaceError::InvalidDisplayName)
    ));
    assert!(matches!(
        workspace.create_new_work_item("Orphan", s.hardware, None),
        Err(WorkspaceError::WrongNodeKind { expected: NodeKind::Definition, .. })
    ));
    assert!(matches!(
        workspace.work_item(uuid::Uuid::new_v4()),
        Err(WorkspaceError::NodeNotFound(_))
    ));
}

#[test]
fn reopen_infers_structure_and_loads_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let s = {
        let mut workspace = Workspace::open(dir.path()).unwrap();
        seed(&mut workspace)
    };

    let mut lazy = Workspace::open(dir.path()).unwrap();
    assert_eq!(lazy.work_items().len(), 2);
    assert!(!lazy.work_items().is_loaded(s.shutdown));
    assert_eq!(lazy.parent_of(s.project).unwrap(), None);
    assert_eq!(lazy.parent_of(s.hardware).unwrap(), Some(s.project));
    assert_eq!(lazy.parent_of(s.system_docs).unwrap(), Some(s.hardware));
    assert_eq!(lazy.parent_of(s.system_def).unwrap(), Some(s.definitions));
    assert_eq!(lazy.parent_of(s.cap_size).unwrap(), Some(s.subsystem_docs));
    let expected_path: std::path::PathBuf = [s.project, s.hardware, s.system_docs, s.shutdown]
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(lazy.node_path(s.shutdown).unwrap(), expected_path);

    let mut eager = Workspace::open_with_config(dir.path(), eager_config()).unwrap();
    assert!(eager.work_items().is_loaded(s.shutdown));

    let on_demand = lazy.work_item(s.shutdown).unwrap().to_record();
    assert!(lazy.work_items().is_loaded(s.shutdown));
    assert_eq!(eager.work_item(s.shutdown).unwrap().to_record(), on_demand);
    assert_eq!(
        lazy.definition(s.subsystem_def).unwrap(),
        eager.definition(s.subsystem_def).unwrap()
    );
}

#[test]
fn discovery_reads_files_without_id_names() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = WorkItemDefinition::new("Legacy");
    fs::create_dir_all(dir.path().join("imports")).unwrap();
    fs::write(
        dir.path().join("imports/legacy.bbdef"),
        serde_json::to_string_pretty(&legacy.to_record()).unwrap(),
    )
    .unwrap();

    let mut workspace = Workspace::open(dir.path()).unwrap();
    assert!(workspace.definitions().is_loaded(legacy.id()));
    assert_eq!(workspace.definition(legacy.id()).unwrap().name(), "Legacy");
    assert_eq!(workspace.discover_all().unwrap(), 0);
}

#[test]
fn config_file_sets_prefix_and_policy() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("tracebook.json"),
        json!({ "file_prefix": "tb", "rule_policy": "warn" }).to_string(),
    )
    .unwrap();

    let mut workspace = Workspace::open(dir.path()).unwrap();
    let project = workspace.create_new_project("Standards", None).unwrap().id();
    assert_eq!(workspace.rule_policy(), RulePolicy::Warn);
    assert_eq!(
        workspace.file_path(project).unwrap().extension().unwrap(),
        "tbproj"
    );

    fs::write(
        dir.path().join("tracebook.json"),
        json!({ "file_prefix": "no/slash" }).to_string(),
    )
    .unwrap();
    assert!(matches!(
        Workspace::open(dir.path()),
        Err(WorkspaceError::Config(_))
    ));
}

#[test]
fn moving_a_work_item_relocates_file_and_membership() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);
    let old_file = workspace.file_path(s.shutdown).unwrap();

    workspace.move_item(s.shutdown, Some(s.subsystem_docs)).unwrap();

    let new_file = workspace.file_path(s.shutdown).unwrap();
    assert!(!old_file.exists());
    assert!(new_file.is_file());
    assert_eq!(new_file.parent(), workspace.file_path(s.subsystem_docs).unwrap().parent());
    assert_eq!(workspace.parent_of(s.shutdown).unwrap(), Some(s.subsystem_docs));
    assert!(!workspace.document(s.system_docs).unwrap().contains(s.shutdown));
    assert!(workspace.document(s.subsystem_docs).unwrap().contains(s.shutdown));

    let mut reopened = Workspace::open(dir.path()).unwrap();
    assert_eq!(reopened.parent_of(s.shutdown).unwrap(), Some(s.subsystem_docs));
    assert!(reopened.document(s.subsystem_docs).unwrap().contains(s.shutdown));
}

#[test]
fn moving_a_container_carries_its_subtree_and_leaves_the_project() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);

    workspace.move_item(s.hardware, None).unwrap();

    assert_eq!(
        relative(&workspace, s.cap_size),
        format!("{h}/{d}/{}.bbitem", s.cap_size, h = s.hardware, d = s.subsystem_docs)
    );
    assert!(workspace.file_path(s.cap_size).unwrap().is_file());
    assert!(!dir.path().join(s.project.to_string()).join(s.hardware.to_string()).exists());

    let project = workspace.project(s.project).unwrap();
    assert!(!project.documents().contains(&s.hardware));
    assert!(!project.documents().contains(&s.system_docs));
    assert!(project.work_items().is_empty());
    assert_eq!(project.definitions().len(), 2);

    let reopened = Workspace::open(dir.path()).unwrap();
    assert_eq!(reopened.parent_of(s.hardware).unwrap(), None);
    assert_eq!(reopened.parent_of(s.cap_size).unwrap(), Some(s.subsystem_docs));
}

#[test]
fn invalid_moves_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);

    assert!(matches!(
        workspace.move_item(s.hardware, Some(s.system_docs)),
        Err(WorkspaceError::CycleDetected { node, parent }) if node == s.hardware && parent == s.system_docs
    ));
    assert!(matches!(
        workspace.move_item(s.hardware, Some(s.hardware)),
        Err(WorkspaceError::CycleDetected { .. })
    ));
    assert!(matches!(
        workspace.move_item(s.cap_size, Some(s.shutdown)),
        Err(WorkspaceError::ParentMustBeContainer(_))
    ));
    assert_eq!(workspace.parent_of(s.hardware).unwrap(), Some(s.project));
}

#[test]
fn failed_relocation_leaves_memory_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);
    let file = workspace.file_path(s.shutdown).unwrap();
    fs::remove_file(&file).unwrap();

    let error = workspace
        .move_item(s.shutdown, Some(s.subsystem_docs))
        .unwrap_err();

    assert!(matches!(error, WorkspaceError::MoveFailed { id, .. } if id == s.shutdown));
    assert_eq!(workspace.parent_of(s.shutdown).unwrap(), Some(s.system_docs));
    assert_eq!(workspace.file_path(s.shutdown).unwrap(), file);
    assert!(workspace.document(s.system_docs).unwrap().contains(s.shutdown));
    assert!(!workspace.document(s.subsystem_docs).unwrap().contains(s.shutdown));
}

fn write_document(dir: &Path, name: &str) -> NodeId {
    let document = Document::new(name);
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join(format!("{}.bbdoc", document.id())),
        serde_json::to_string_pretty(&document.to_record()).unwrap(),
    )
    .unwrap();
    document.id()
}

#[test]
fn moving_a_container_leaves_its_directory_neighbours_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared");
    let moved = write_document(&shared, "Moved");
    let neighbour = write_document(&shared, "Neighbour");

    let mut workspace = Workspace::open(dir.path()).unwrap();
    let neighbour_file = workspace.file_path(neighbour).unwrap();
    let project = workspace.create_new_project("Target", None).unwrap().id();
    workspace.move_item(moved, Some(project)).unwrap();

    assert_eq!(
        relative(&workspace, moved),
        format!("{project}/{moved}/{moved}.bbdoc")
    );
    assert_eq!(workspace.file_path(neighbour).unwrap(), neighbour_file);
    assert!(neighbour_file.is_file());
    assert_eq!(workspace.document(neighbour).unwrap().name(), "Neighbour");

    let mut reopened = Workspace::open(dir.path()).unwrap();
    assert_eq!(reopened.document(neighbour).unwrap().name(), "Neighbour");
    assert_eq!(reopened.parent_of(moved).unwrap(), Some(project));
}

#[test]
fn moving_a_root_level_container_file() {
    let dir = tempfile::tempdir().unwrap();
    let loose = write_document(dir.path(), "Loose");
    let mut workspace = Workspace::open(dir.path()).unwrap();
    assert_eq!(relative(&workspace, loose), format!("{loose}.bbdoc"));
    let project = workspace.create_new_project("Target", None).unwrap().id();

    workspace.move_item(loose, Some(project)).unwrap();

    assert!(!dir.path().join(format!("{loose}.bbdoc")).exists());
    assert!(workspace.file_path(loose).unwrap().is_file());
    assert!(workspace.file_path(project).unwrap().is_file());
    assert!(workspace.project(project).unwrap().documents().contains(&loose));
}

#[test]
fn definition_edits_reach_loaded_and_unloaded_items() {
    let dir = tempfile::tempdir().unwrap();
    let s = {
        let mut workspace = Workspace::open(dir.path()).unwrap();
        let s = seed(&mut workspace);
        {
            let mut edit = workspace.edit_definition(s.system_def).unwrap();
            edit.add_public_field(Field::plain_text("Rationale", ""));
        }
        assert!(workspace
            .work_item(s.shutdown)
            .unwrap()
            .entity()
            .public_field("Rationale")
            .is_ok());
        s
    };

    let mut workspace = Workspace::open(dir.path()).unwrap();
    {
        let mut edit = workspace.edit_definition(s.subsystem_def).unwrap();
        edit.add_private_field(Field::plain_text("Reviewer", ""));
    }
    workspace.save_definition(s.subsystem_def).unwrap();
    assert!(!workspace.work_items().is_loaded(s.cap_size));

    let item = workspace.work_item(s.cap_size).unwrap();
    assert!(item.entity().private_field("Reviewer").is_ok());
    assert!(item.entity().public_field("Requirement").is_ok());
}

#[test]
fn link_outcomes_follow_the_active_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let s = seed(&mut workspace);
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&warnings);
    workspace
        .rule_warnings()
        .subscribe(move |violation| sink.borrow_mut().push(violation.clone()));

    assert_eq!(
        workspace.add_downstream(s.shutdown, s.cap_size).unwrap(),
        LinkOutcome::Linked
    );
    assert!(workspace.work_item(s.cap_size).unwrap().upstream().contains(&s.shutdown));

    let refused = workspace.add_downstream(s.cap_size, s.shutdown).unwrap();
    assert!(matches!(refused, LinkOutcome::Refused(_)));
    assert!(workspace.work_item(s.cap_size).unwrap().downstream().is_empty());
    assert!(warnings.borrow().is_empty());

    workspace.set_rule_policy(RulePolicy::Warn);
    let warned = workspace.add_upstream(s.shutdown, s.cap_size).unwrap();
    assert!(matches!(warned, LinkOutcome::LinkedWithWarning(_)));
    assert_eq!(warnings.borrow().len(), 1);
    assert!(workspace.work_item(s.cap_size).unwrap().downstream().contains(&s.shutdown));

    assert!(workspace.remove_upstream(s.shutdown, s.cap_size).unwrap());
    assert!(workspace.work_item(s.cap_size).unwrap().downstream().is_empty());
    assert!(matches!(
        workspace.add_downstream(s.shutdown, s.shutdown),
        Err(WorkspaceError::SelfLink(_))
    ));
}

#[test]
fn save_all_persists_field_values() {
    let dir = tempfile::tempdir().unwrap();
    let s = {
        let mut workspace = Workspace::open(dir.path()).unwrap();
        let s = seed(&mut workspace);
        workspace
            .work_item(s.shutdown)
            .unwrap()
            .entity_mut()
            .public_field_mut("Requirement")
            .unwrap()
            .set_text("The system shall shut down within 500 ns.")
            .unwrap();
        assert!(workspace.save_all().unwrap() >= 9);
        s
    };

    let mut workspace = Workspace::open(dir.path()).unwrap();
    let text = workspace
        .work_item(s.shutdown)
        .unwrap()
        .entity()
        .public_field("Requirement")
        .unwrap()
        .text()
        .unwrap()
        .to_string();
    assert_eq!(text, "The system shall shut down within 500 ns.");
}

#[test]
fn default_definitions_are_installed_with_their_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let project = workspace.create_new_project("Defaults", None).unwrap().id();

    let [feature, requirement, test_case] =
        workspace.install_default_definitions(Some(project)).unwrap();

    assert!(workspace.definition(feature).unwrap().allows_downstream(requirement));
    assert!(workspace.definition(test_case).unwrap().allows_upstream(requirement));
    assert_eq!(workspace.project(project).unwrap().definitions().len(), 3);
    assert_eq!(workspace.children(Some(project)).len(), 3);
}

#[test]
fn render_tree_prints_names_by_depth() {
    let dir = tempfile::tempdir().unwrap();
    let mut workspace = Workspace::open(dir.path()).unwrap();
    let standards = workspace.create_new_document("Standards", None).unwrap().id();
    let iso = workspace
        .create_new_project("ISO-6469", Some(standards))
        .unwrap()
        .id();
    workspace.create_new_document("3", Some(iso)).unwrap();

    assert_eq!(
        workspace.render_tree(),
        "Standards [document]\n  ISO-6469 [project]\n    3 [document]\n"
    );
    assert!(workspace.file_path(iso).unwrap().is_file());
}
