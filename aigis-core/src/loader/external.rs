//! External loader: opaque child process, no injector, no RPC participation.

use std::process::Stdio;
use std::sync::Arc;

use crate::error::LoadError;
use crate::plugin::{ChildHandle, PluginRecord};
use crate::registry::PluginRegistry;
use crate::watchdog::Scheduler;

pub fn run(record: &mut PluginRecord, scheduler: &Scheduler, registry: &Arc<PluginRegistry>) -> Result<(), LoadError> {
    let manifest = record.manifest.as_ref().expect("configured before dispatch");
    let (prog, args) = manifest
        .launch
        .split_first()
        .ok_or_else(|| LoadError::InvalidPluginType("external plugin has empty LAUNCH".to_string()))?;

    let log_file = open_log_file(record)?;
    let log_file_err = log_file.try_clone().map_err(LoadError::Io)?;

    let mut cmd = tokio::process::Command::new(prog);
    cmd.args(args)
        .current_dir(&manifest.entrypoint)
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .kill_on_drop(false);

    let name = record.name.clone();
    let registry = Arc::clone(registry);
    let child = scheduler
        .block_on(async move { cmd.spawn() })
        .map_err(LoadError::Io)?;
    let pid = child.id();
    let stop = scheduler.watch(registry, name, child);

    record.child = Some(ChildHandle::Local { pid, stop });
    Ok(())
}

pub(super) fn open_log_file(record: &PluginRecord) -> Result<std::fs::File, LoadError> {
    let path = record.log.dir.join(format!("{}.log", record.log.file_stem));
    std::fs::OpenOptions::new().create(true).append(true).open(path).map_err(LoadError::Io)
}
