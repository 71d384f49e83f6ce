//! Command-line entry point.
//!
//! # Responsibility
//! - `tree <dir>` prints the node hierarchy of an existing workspace.
//! - `demo <dir>` seeds a sample traceability workspace and prints it.
//! - Keep output deterministic for quick local sanity checks.

use log::info;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracebook_core::{
    core_version, default_log_level, init_logging, Field, LinkOutcome, Workspace,
};

const USAGE: &str = "usage: tracebook <tree|demo> <workspace-dir>";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, dir) = match args.as_slice() {
        [command, dir] => (command.as_str(), PathBuf::from(dir)),
        [flag] if flag == "--version" => {
            println!("tracebook {}", core_version());
            return ExitCode::SUCCESS;
        }
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let result = absolute(&dir).and_then(|root| {
        start_logging(&root)?;
        match command {
            "tree" => print_tree(&root),
            "demo" => run_demo(&root),
            other => Err(format!("unknown command `{other}`\n{USAGE}").into()),
        }
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn absolute(dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(dir))
}

fn start_logging(root: &Path) -> Result<(), Box<dyn Error>> {
    let log_dir = root.join(".logs");
    let log_dir = log_dir
        .to_str()
        .ok_or("workspace path is not valid UTF-8")?;
    init_logging(default_log_level(), log_dir)?;
    Ok(())
}

fn print_tree(root: &Path) -> Result<(), Box<dyn Error>> {
    let mut workspace = Workspace::open(root)?;
    workspace.discover_all()?;
    print!("{}", workspace.render_tree());
    Ok(())
}

/// Builds a small hardware requirements project next to a standards
/// document, then prints the resulting tree.
fn run_demo(root: &Path) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(root)?;
    let mut workspace = Workspace::open(root)?;
    info!("event=demo_seed module=cli status=start");

    let project = workspace.create_new_project("Example Project", None)?.id();
    let definitions = workspace
        .create_new_document("Definitions", Some(project))?
        .id();
    let hardware = workspace.create_new_document("Hardware", Some(project))?.id();
    let system_docs = workspace
        .create_new_document("System Requirements", Some(hardware))?
        .id();
    let subsystem_docs = workspace
        .create_new_document("Sub-system Requirements", Some(hardware))?
        .id();

    let system_def = workspace
        .create_new_definition("System Requirement", Some(definitions))?
        .id();
    let subsystem_def = workspace
        .create_new_definition("Sub-system Requirement", Some(definitions))?
        .id();
    workspace.add_downstream_rule(system_def, subsystem_def, true)?;

    for definition in [system_def, subsystem_def] {
        let mut edit = workspace.edit_definition(definition)?;
        edit.add_public_fields(requirement_fields()?);
    }

    let shutdown = workspace
        .create_new_work_item("Shutdown Time", system_def, Some(system_docs))?
        .id();
    fill_requirement(
        &mut workspace,
        shutdown,
        "The system shall have a shutdown time of no more than 500 ns.",
    )?;
    let cap_size = workspace
        .create_new_work_item("Cap Size", subsystem_def, Some(subsystem_docs))?
        .id();
    fill_requirement(
        &mut workspace,
        cap_size,
        "The regulator output shall have an input capacitance no larger than 10 uF.",
    )?;

    match workspace.add_downstream(shutdown, cap_size)? {
        LinkOutcome::Refused(violation) => println!("link refused: {violation}"),
        LinkOutcome::LinkedWithWarning(violation) => println!("link warning: {violation}"),
        LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {}
    }

    let standards = workspace.create_new_document("Standards", None)?.id();
    let iso = workspace
        .create_new_project("ISO-6469", Some(standards))?
        .id();
    workspace.create_new_document("3", Some(iso))?;

    let saved = workspace.save_all()?;
    info!("event=demo_seed module=cli status=ok saved={}", saved);
    print!("{}", workspace.render_tree());
    Ok(())
}

fn requirement_fields() -> Result<Vec<Field>, Box<dyn Error>> {
    Ok(vec![
        Field::long_text("Requirement", ""),
        Field::single_choice(
            "Assigned To",
            [
                "Electrical Engineer",
                "Software Engineer",
                "Mechanical Engineer",
            ],
            "Electrical Engineer",
        )?,
    ])
}

fn fill_requirement(
    workspace: &mut Workspace,
    item: tracebook_core::NodeId,
    text: &str,
) -> Result<(), Box<dyn Error>> {
    let entity = workspace.work_item(item)?.entity_mut();
    entity.public_field_mut("Requirement")?.set_text(text)?;
    entity
        .public_field_mut("Assigned To")?
        .set_current("Electrical Engineer")?;
    Ok(())
}
