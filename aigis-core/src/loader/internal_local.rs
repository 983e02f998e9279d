//! Internal-local loader: child process that joins the RPC mesh via the
//! injector program, rather than running opaque like `external`.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::LoadError;
use crate::loader::LAUNCH_TIMEOUT;
use crate::plugin::{ChildHandle, PluginRecord};
use crate::registry::PluginRegistry;
use crate::skills::Skills;
use crate::watchdog::Scheduler;

/// The line the injector prints to its own stdout once it has connected to
/// the broker and successfully invoked the plugin's `launch()`. The spawn
/// itself is awaited to completion before this loader returns success.
const READY_SENTINEL: &str = "AIGIS_READY";

pub fn run(
    record: &mut PluginRecord,
    scheduler: &Scheduler,
    registry: &Arc<PluginRegistry>,
    skills: &Arc<Skills>,
) -> Result<(), LoadError> {
    // Optional host-side skills from an accompanying AIGIS.core, injected
    // the same way the `core` loader does.
    if let Ok(path) = super::core::artifact_path(record) {
        let plugin = super::core::load_plugin(&path)?;
        let log = aigis_plugin_api::PluginLog::new(Box::leak(record.name.clone().into_boxed_str()));
        skills.learn(&record.name, log, plugin.skills())?;
    }

    let manifest = record.manifest.as_ref().expect("configured before dispatch");
    let launch = manifest
        .launch
        .first()
        .ok_or_else(|| LoadError::InvalidPluginType("internal-local plugin has empty LAUNCH".to_string()))?
        .clone();
    let entrypoint = manifest.entrypoint.clone();
    let injector = injector_binary_path();

    let mut cmd = tokio::process::Command::new(&injector);
    cmd.arg(&entrypoint).arg(&launch).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(false);

    let log_path = record.log.dir.join(format!("{}.log", record.log.file_stem));
    let name = record.name.clone();
    let registry_for_watch = Arc::clone(registry);

    let (child, pid) = scheduler
        .block_on(spawn_and_confirm(cmd, log_path, name.clone()))
        .map_err(|_| LoadError::LaunchTimeout(LAUNCH_TIMEOUT))?;

    let stop = scheduler.watch(registry_for_watch, name, child);
    record.child = Some(ChildHandle::Local { pid, stop });
    Ok(())
}

async fn spawn_and_confirm(
    mut cmd: tokio::process::Command,
    log_path: std::path::PathBuf,
    name: String,
) -> Result<(tokio::process::Child, Option<u32>), ()> {
    let mut child = cmd.spawn().map_err(|_| ())?;
    let pid = child.id();
    let stdout = child.stdout.take().ok_or(())?;
    let stderr = child.stderr.take().ok_or(())?;

    let confirm = async move {
        let mut lines = BufReader::new(stdout).lines();
        let log_path2 = log_path.clone();
        tokio::spawn(async move { drain_to_log(BufReader::new(stderr), log_path2).await });
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == READY_SENTINEL {
                let log_path = log_path.clone();
                tokio::spawn(async move { drain_lines_to_log(lines, log_path).await });
                return Ok(());
            }
            append_log(&log_path, &line);
        }
        Err(())
    };

    match tokio::time::timeout(LAUNCH_TIMEOUT, confirm).await {
        Ok(Ok(())) => {
            tracing::info!(target: "aigis::boot", plugin = %name, "injector confirmed launch");
            Ok((child, pid))
        }
        _ => {
            let _ = child.start_kill();
            Err(())
        }
    }
}

async fn drain_to_log<R: tokio::io::AsyncRead + Unpin>(reader: BufReader<R>, log_path: std::path::PathBuf) {
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        append_log(&log_path, &line);
    }
}

async fn drain_lines_to_log<R: tokio::io::AsyncRead + Unpin>(
    mut lines: tokio::io::Lines<BufReader<R>>,
    log_path: std::path::PathBuf,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        append_log(&log_path, &line);
    }
}

fn append_log(log_path: &std::path::Path, line: &str) {
    use std::io::Write;
    if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = writeln!(f, "{line}");
    }
}

fn injector_binary_path() -> std::path::PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("aigis-injector")))
        .unwrap_or_else(|| std::path::PathBuf::from("aigis-injector"))
}
