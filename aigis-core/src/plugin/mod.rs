//! Plugin Record: identity, configuration, and runtime handle for one
//! plugin.

pub mod acquisition;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{PluginManifest, PluginType};
use crate::logging::PluginLogSink;

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Stable-within-a-run unique identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginId(pub u64);

impl PluginId {
    fn next() -> Self {
        PluginId(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which top-level TOML section a plugin was declared under, used to
/// preserve the fixed per-category load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Core,
    Internal,
    InternalLocal,
    InternalRemote,
    External,
}

/// Abstracts a running subprocess. Exit status and termination are owned by
/// the Watchdog task running on the scheduler
/// (see [`crate::watchdog`]), not by this handle directly — the handle is
/// just what `stop()` uses to ask that task to terminate the child.
/// `Local` backs `internal-local`/`external`; `Remote` backs
/// `internal-remote`, whose child lives on the far end of an SSH session.
pub enum ChildHandle {
    Local { pid: Option<u32>, stop: crate::watchdog::StopHandle },
    Remote { stop: crate::loader::remote::RemoteStopHandle },
}

impl ChildHandle {
    pub fn request_stop(&mut self, scheduler: &crate::watchdog::Scheduler) {
        match self {
            ChildHandle::Local { stop, .. } => stop.request_stop(scheduler),
            ChildHandle::Remote { stop } => stop.request_stop(scheduler),
        }
    }
}

/// The per-plugin record the Registry owns. Present in exactly one
/// of {pending, live, dead} at any time — enforced by which `Vec` in
/// [`crate::registry::PluginRegistry`] currently holds it, not by a field
/// on the record itself.
pub struct PluginRecord {
    pub id: PluginId,
    pub name: String,
    pub source_uri: String,
    pub root: PathBuf,
    pub repo_root: PathBuf,
    pub category: Category,
    pub manifest: Option<PluginManifest>,
    pub restart: u32,
    pub reload: bool,
    pub child: Option<ChildHandle>,
    pub log: PluginLogSink,
    /// Attached by the loader when a `core`/`internal-local` module exposes
    /// a `cleanup` callable. Invoked once, best-effort, from
    /// [`PluginRecord::cleanup`].
    pub cleanup_hook: Option<Box<dyn FnMut() + Send>>,
}

impl PluginRecord {
    /// Resolves the on-disk root, opens the plugin-scoped log sink, and
    /// emits a registration line. Does not touch disk beyond path
    /// computation.
    pub fn new(
        repo_root: &std::path::Path,
        name: &str,
        source_uri: &str,
        category: Category,
    ) -> anyhow::Result<Self> {
        let id = PluginId::next();
        let root = repo_root.join("ext").join(name);
        let log = PluginLogSink::open(repo_root, name, id.0)?;
        let record = PluginRecord {
            id,
            name: name.to_string(),
            source_uri: source_uri.to_string(),
            root,
            repo_root: repo_root.to_path_buf(),
            category,
            manifest: None,
            restart: 0,
            reload: false,
            child: None,
            log,
            cleanup_hook: None,
        };
        tracing::info!(target: "aigis::boot", plugin = %record.name, id = record.id.0, "plugin registered");
        Ok(record)
    }

    /// Loads the manifest, normalizes optional fields (handled by serde
    /// defaults in [`PluginManifest`]), and selects the declared type.
    /// Returns `ConfigMissing` if the manifest file is absent.
    pub fn configure(&mut self) -> Result<(), crate::error::LoadError> {
        let mut manifest = PluginManifest::load(&self.root)?;
        manifest.contextualize(&self.root);
        self.restart = manifest.restart;
        self.manifest = Some(manifest);
        Ok(())
    }

    pub fn plugin_type(&self) -> Option<PluginType> {
        self.manifest.as_ref().map(|m| m.plugin_type)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.category, Category::Core) || self.child.is_some()
    }

    /// Best-effort release of record-owned resources; guaranteed called
    /// exactly once per record via `PluginRegistry`'s internal safe-cleanup
    /// path. Invokes the plugin's own declared cleanup hook, if any;
    /// failures are swallowed but logged. Does not touch the child handle —
    /// that is `loader::stop`'s job, run immediately after this by the
    /// caller.
    pub fn cleanup(&mut self) {
        if let Some(hook) = self.cleanup_hook.as_mut() {
            hook();
        }
    }
}

impl PartialEq for PluginRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Equality against a bare name, for lookup convenience.
impl PartialEq<str> for PluginRecord {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}
