//! Global and per-plugin log sinks, built on `tracing` + `tracing-subscriber`
//! + `tracing-appender`.
//!
//! The global subscriber is a `Registry` wearing two layers: a stdout+core-log
//! `fmt` layer that sees everything, and [`PluginRoutingLayer`], which
//! demultiplexes events carrying a `plugin` field out to that plugin's own
//! `NonBlocking` writer. Both layers see every event; the routing layer just
//! drops events whose `plugin` field names a plugin with no sink registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Owns the non-blocking writer guards for every sink installed during this
/// run. Dropping it flushes and closes the underlying files; `main.rs` keeps
/// one alive for the process lifetime.
pub struct LogHandles {
    _guards: Vec<WorkerGuard>,
}

fn sink_registry() -> &'static Mutex<HashMap<String, NonBlocking>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, NonBlocking>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Extracts the `plugin` field (recorded either as a plain `&str` or, via
/// `%expr`, through `record_debug`'s Display-backed wrapper) and the implicit
/// `message` field off an event.
#[derive(Default)]
struct PluginFieldVisitor {
    plugin: Option<String>,
    message: Option<String>,
}

impl Visit for PluginFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "plugin" {
            self.plugin = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "plugin" if self.plugin.is_none() => self.plugin = Some(format!("{value:?}")),
            "message" => self.message = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// Routes every event carrying a `plugin` field to that plugin's registered
/// sink, if one is open. Installed once alongside the stdout/core-log layer
/// in [`init_global`]; [`PluginLogSink::open`] and its `Drop` impl are what
/// register and retire entries in the shared sink map.
struct PluginRoutingLayer;

impl<S: Subscriber> Layer<S> for PluginRoutingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = PluginFieldVisitor::default();
        event.record(&mut visitor);
        let Some(plugin) = visitor.plugin else { return };

        let mut writer = {
            let registry = sink_registry().lock().unwrap_or_else(|e| e.into_inner());
            match registry.get(&plugin) {
                Some(w) => w.clone(),
                None => return,
            }
        };

        let meta = event.metadata();
        let line = format!(
            "{} {} plugin={} {}\n",
            meta.level(),
            meta.target(),
            plugin,
            visitor.message.as_deref().unwrap_or(""),
        );
        let _ = std::io::Write::write_all(&mut writer, line.as_bytes());
    }
}

/// Installs the global subscriber: a stdout layer plus the rotating
/// `log/core.log` sink, plus [`PluginRoutingLayer`] for per-plugin demux.
/// Call exactly once, before any plugin loads, so
/// `tracing::subscriber::set_global_default` only ever runs one time per
/// process.
pub fn init_global(repo_root: &Path) -> anyhow::Result<LogHandles> {
    let log_dir = repo_root.join("log");
    std::fs::create_dir_all(&log_dir)?;

    let core_appender = tracing_appender::rolling::never(&log_dir, "core.log");
    let (core_writer, core_guard) = tracing_appender::non_blocking(core_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout.and(core_writer))
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(PluginRoutingLayer)
        .init();

    Ok(LogHandles { _guards: vec![core_guard] })
}

/// Per-plugin sink (`log/plugins/<name>_<id>.log`), rotated daily. Created
/// at `PluginRecord::new` and kept alive until bury; registers its writer
/// under `plugin_name` in the process-wide sink map for the duration of its
/// lifetime so [`PluginRoutingLayer`] can find it, and unregisters on drop.
///
/// `tracing-appender`'s daily roller only rotates; it never deletes old
/// files, so a 3-backup retention policy is enforced by [`prune_backups`]
/// run right after rotation is configured and again each time the record is
/// re-created on restart/reload.
pub struct PluginLogSink {
    pub dir: PathBuf,
    pub file_stem: String,
    plugin_name: String,
    _guard: WorkerGuard,
}

impl PluginLogSink {
    pub fn open(repo_root: &Path, plugin_name: &str, plugin_id: u64) -> anyhow::Result<Self> {
        let dir = repo_root.join("log").join("plugins");
        std::fs::create_dir_all(&dir)?;
        let file_stem = format!("{plugin_name}_{plugin_id}");
        let appender = tracing_appender::rolling::daily(&dir, format!("{file_stem}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        prune_backups(&dir, &file_stem, 3)?;

        sink_registry()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin_name.to_string(), writer);

        Ok(PluginLogSink { dir, file_stem, plugin_name: plugin_name.to_string(), _guard: guard })
    }
}

impl Drop for PluginLogSink {
    fn drop(&mut self) {
        sink_registry().lock().unwrap_or_else(|e| e.into_inner()).remove(&self.plugin_name);
    }
}

/// Keeps at most `keep` rotated backups of `<dir>/<file_stem>.log.*`,
/// deleting the oldest by filename (the daily roller's suffix is a
/// lexicographically sortable date, so name order is age order).
pub fn prune_backups(dir: &Path, file_stem: &str, keep: usize) -> std::io::Result<()> {
    let prefix = format!("{file_stem}.log.");
    let mut backups: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(&prefix)))
        .collect();
    backups.sort();
    if backups.len() > keep {
        for stale in &backups[..backups.len() - keep] {
            let _ = std::fs::remove_file(stale);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_backups_keeps_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        for suffix in ["2026-07-20", "2026-07-21", "2026-07-22", "2026-07-23"] {
            std::fs::write(dir.path().join(format!("greeter_1.log.{suffix}")), "").unwrap();
        }
        prune_backups(dir.path(), "greeter_1", 3).unwrap();
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(remaining.len(), 3);
        assert!(!dir.path().join("greeter_1.log.2026-07-20").exists());
        assert!(dir.path().join("greeter_1.log.2026-07-23").exists());
    }

    #[test]
    fn open_registers_and_drop_unregisters_sink() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = PluginLogSink::open(dir.path(), "greeter", 7).unwrap();
            assert!(sink_registry().lock().unwrap().contains_key("greeter"));
        }
        assert!(!sink_registry().lock().unwrap().contains_key("greeter"));
    }
}
