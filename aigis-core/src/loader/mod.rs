//! Loader dispatch: shared requirements/secrets pipeline, then a
//! type-specific `run` step. Each loader strategy is a small `impl`
//! selected by [`crate::config::PluginType`]; unknown/failed configuration
//! selects the trap strategy.

pub mod core;
pub mod external;
pub mod internal_local;
pub mod remote;
pub mod trap;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PluginType;
use crate::error::LoadError;
use crate::plugin::PluginRecord;
use crate::registry::PluginRegistry;
use crate::skills::Skills;
use crate::watchdog::Scheduler;

pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const STOP_GRACE: Duration = Duration::from_secs(5);
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs the full shared pipeline against a configured record, then hands
/// off to the type-specific `run` step.
pub fn dispatch(
    record: &mut PluginRecord,
    scheduler: &Scheduler,
    registry: &Arc<PluginRegistry>,
    skills: &Arc<Skills>,
) -> Result<(), LoadError> {
    check_requirements(record)?;
    stage_secrets(record)?;
    run(record, scheduler, registry, skills)
}

/// Step 2: requirements.
fn check_requirements(record: &PluginRecord) -> Result<(), LoadError> {
    let manifest = record
        .manifest
        .as_ref()
        .ok_or_else(|| LoadError::RequirementError("plugin has no manifest".to_string()))?;

    for exe in &manifest.system_requirements {
        if which::which(exe).is_err() {
            return Err(LoadError::RequirementError(format!("host has no {exe} installed")));
        }
    }

    if !manifest.requirement_command.is_empty() {
        let mut argv = manifest.requirement_command.clone();
        argv.push(manifest.requirement_file.clone());
        let (prog, args) = argv.split_first().expect("non-empty checked above");
        let status = std::process::Command::new(prog)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| LoadError::RequirementError(format!("requirement command failed to spawn: {e}")))?;
        if !status.success() {
            return Err(LoadError::RequirementError(format!(
                "requirement command exited with {status}"
            )));
        }
    }
    Ok(())
}

/// Step 3: secrets. Computes the full missing set before failing, and
/// copies each present secret to its destination.
fn stage_secrets(record: &PluginRecord) -> Result<(), LoadError> {
    let manifest = record.manifest.as_ref().expect("configured before dispatch");
    if manifest.secrets.is_empty() {
        return Ok(());
    }

    let secret_store = record.repo_root.join("secrets").join(&record.name);
    let mut missing = Vec::new();
    for key in manifest.secrets.keys() {
        let src = secret_store.join(key);
        if !src.exists() {
            missing.push(src);
        }
    }
    if !missing.is_empty() {
        return Err(LoadError::MissingSecretError(missing));
    }

    for (key, dest) in &manifest.secrets {
        let src = secret_store.join(key);
        let dest_path = PathBuf::from(dest);
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&src, &dest_path)?;
    }
    Ok(())
}

/// Step 4: type-specific run, dispatched by the manifest's declared
/// `plugin_type`. An unknown or unconfigured type selects the trap
/// strategy.
fn run(
    record: &mut PluginRecord,
    scheduler: &Scheduler,
    registry: &Arc<PluginRegistry>,
    skills: &Arc<Skills>,
) -> Result<(), LoadError> {
    match record.plugin_type() {
        Some(PluginType::Core) => core::run(record, skills),
        Some(PluginType::InternalLocal) => internal_local::run(record, scheduler, registry, skills),
        Some(PluginType::InternalRemote) => remote::run(record, scheduler, registry),
        Some(PluginType::External) => external::run(record, scheduler, registry),
        Some(PluginType::Internal) | None => trap::run(record),
    }
}

/// Stop semantics shared by every child-holding loader: asks the Watchdog
/// task owning the child to TERM, poll up to 5s at >=100Hz, then KILL. An
/// already-dead child is not an error — the watchdog task swallows it (see
/// [`crate::watchdog`]).
pub fn stop(record: &mut PluginRecord, scheduler: &Scheduler) -> Result<(), LoadError> {
    if let Some(mut handle) = record.child.take() {
        handle.request_stop(scheduler);
    }
    Ok(())
}
