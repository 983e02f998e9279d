//! Plugin Registry: in-memory catalog with live/dead partitions and the
//! load/try-load/bury/cleanup pipeline.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::config::{PluginSourceMap, SystemCreds};
use crate::loader;
use crate::plugin::{Category, PluginRecord};
use crate::skills::Skills;
use crate::watchdog::Scheduler;

/// Two ordered sets by insertion order. Held behind a single mutex: all
/// mutation happens from the supervisor thread or from watchdog callbacks
/// marshaled to it, so contention is not a design concern here. Owns the
/// one [`Scheduler`]
/// every loader strategy submits child spawns/watches onto.
///
/// `skills` is set once, right after construction, by
/// [`PluginRegistry::attach_skills`] — `Skills` itself needs an
/// `Arc<PluginRegistry>` (for `AIGISReload`), so the two are built in two
/// steps to avoid a construction-time cycle.
pub struct PluginRegistry {
    scheduler: Scheduler,
    skills: OnceLock<Arc<Skills>>,
    system: OnceLock<SystemCreds>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    live: Vec<PluginRecord>,
    dead: Vec<PluginRecord>,
    reload_requests: Vec<String>,
}

impl PluginRegistry {
    pub fn new(scheduler: Scheduler) -> Self {
        PluginRegistry {
            scheduler,
            skills: OnceLock::new(),
            system: OnceLock::new(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn attach_skills(&self, skills: Arc<Skills>) {
        let _ = self.skills.set(skills);
    }

    /// Stores the top-level `[system]` credentials the `internal-remote`
    /// loader authenticates with; unset means "no credentials configured",
    /// which the remote transport treats as an empty login/password pair.
    pub fn attach_system_creds(&self, creds: SystemCreds) {
        let _ = self.system.set(creds);
    }

    pub fn system_creds(&self) -> SystemCreds {
        self.system.get().cloned().unwrap_or_default()
    }

    fn skills(&self) -> &Arc<Skills> {
        self.skills.get().expect("attach_skills called before any load")
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Loads every source in `sources`, in insertion order, catching any
    /// per-entry failure, logging it, and continuing to the next.
    pub fn load_all(self: &Arc<Self>, repo_root: &std::path::Path, category: Category, sources: &PluginSourceMap) {
        for (name, uri) in sources {
            if let Err(e) = self.load_one(repo_root, name, uri, category) {
                tracing::error!(plugin = %name, "load_one failed: {e}");
            }
        }
    }

    /// Creates a record, acquires its source, configures it, then hands it
    /// to [`Self::try_load`].
    pub fn load_one(
        self: &Arc<Self>,
        repo_root: &std::path::Path,
        name: &str,
        uri: &str,
        category: Category,
    ) -> anyhow::Result<()> {
        let mut record = PluginRecord::new(repo_root, name, uri, category)?;
        if !crate::plugin::acquisition::acquire(&mut record) {
            self.inner.lock().dead.push(record);
            return Ok(());
        }
        if let Err(e) = record.configure() {
            tracing::error!(plugin = %record.name, "configure failed: {e}");
            self.inner.lock().dead.push(record);
            return Ok(());
        }
        self.try_load(record);
        Ok(())
    }

    /// Invokes the record's loader pipeline; on any `LoadError` or
    /// unexpected error, moves it to dead after [`Self::safe_cleanup`]; on
    /// success, appends it to live.
    pub fn try_load(self: &Arc<Self>, mut record: PluginRecord) {
        match loader::dispatch(&mut record, &self.scheduler, self, self.skills()) {
            Ok(()) => {
                tracing::info!(target: "aigis::boot", plugin = %record.name, "loaded");
                self.retire_existing_live(&record.name);
                self.inner.lock().live.push(record);
            }
            Err(e) => {
                tracing::error!(plugin = %record.name, "load failed: {e}");
                self.safe_cleanup(&mut record);
                self.inner.lock().dead.push(record);
            }
        }
    }

    /// Two records with the same name never coexist in `live`: a second
    /// acquisition of an already-present name retires the old record (its
    /// child stopped, cleanup hook run) before the new one takes its place.
    /// A no-op when `name` has no live record, which is always the case for
    /// the reload/restart path since [`Self::bury`] has already removed it.
    fn retire_existing_live(&self, name: &str) {
        let existing = {
            let mut inner = self.inner.lock();
            let idx = inner.live.iter().position(|r| r.name == name);
            idx.map(|i| inner.live.remove(i))
        };
        if let Some(mut record) = existing {
            tracing::warn!(
                target: "aigis::shutdown",
                plugin = %name,
                "superseded by a fresh acquisition, retiring previous record"
            );
            self.safe_cleanup(&mut record);
            self.inner.lock().dead.push(record);
        }
    }

    /// Removes `name` from `live`, applies the reload/restart/retire
    /// decision, and either re-inserts (reload/restart) or moves it to
    /// `dead` (retire).
    pub fn bury(self: &Arc<Self>, name: &str) {
        let record = {
            let mut inner = self.inner.lock();
            let idx = inner.live.iter().position(|r| r.name == name);
            match idx {
                Some(i) => inner.live.remove(i),
                None => return,
            }
        };
        self.bury_record(record);
    }

    fn bury_record(self: &Arc<Self>, mut record: PluginRecord) {
        if record.reload {
            record.reload = false;
            tracing::info!(target: "aigis::boot", plugin = %record.name, "reloading");
            self.try_load(record);
        } else if record.restart > 0 {
            record.restart -= 1;
            tracing::warn!(plugin = %record.name, restart_remaining = record.restart, "restarting");
            self.try_load(record);
        } else {
            self.safe_cleanup(&mut record);
            tracing::warn!(target: "aigis::shutdown", plugin = %record.name, "retired");
            self.inner.lock().dead.push(record);
        }
    }

    /// Flags a live plugin by name for reload on its next bury. This marks
    /// the flag; the supervisor's watchdog loop triggers the actual bury on
    /// exit, or the loader requests an immediate stop for in-process `core`
    /// plugins that have no child to wait on.
    pub fn request_reload(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.live.iter_mut().find(|r| r.name == name) {
            record.reload = true;
            inner.reload_requests.push(name.to_string());
            true
        } else {
            false
        }
    }

    /// Emits a global shutdown line and runs [`Self::safe_cleanup`] over
    /// every live record, in insertion order.
    pub fn cleanup(&self) {
        tracing::warn!(target: "aigis::shutdown", "supervisor shutting down");
        let mut inner = self.inner.lock();
        let live: Vec<PluginRecord> = std::mem::take(&mut inner.live);
        drop(inner);
        for mut record in live {
            self.safe_cleanup(&mut record);
            self.inner.lock().dead.push(record);
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn dead_count(&self) -> usize {
        self.inner.lock().dead.len()
    }

    pub fn is_live(&self, name: &str) -> bool {
        self.inner.lock().live.iter().any(|r| r.name == name)
    }

    /// Sets `restart=0, reload=false` so the record cannot re-enter via
    /// bury, calls the record's cleanup hook (errors swallowed but logged),
    /// then stops its loader-owned child if any.
    fn safe_cleanup(&self, record: &mut PluginRecord) {
        record.restart = 0;
        record.reload = false;
        record.cleanup();
        if let Err(e) = loader::stop(record, &self.scheduler) {
            tracing::warn!(plugin = %record.name, "stop failed during cleanup: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    impl PluginRegistry {
        /// Test-only constructor: a registry with its own scheduler and an
        /// attached (empty) Skills Registry, for unit tests that don't need
        /// a running supervisor.
        pub(crate) fn for_tests() -> Arc<Self> {
            let registry = Arc::new(PluginRegistry::new(Scheduler::start().expect("scheduler starts")));
            registry.attach_skills(Arc::new(Skills::new(Arc::clone(&registry))));
            registry
        }
    }

    fn write_manifest(source_dir: &std::path::Path, manifest_toml: &str) {
        let aigis_dir = source_dir.join("AIGIS");
        std::fs::create_dir_all(&aigis_dir).unwrap();
        std::fs::write(aigis_dir.join("AIGIS.config"), manifest_toml).unwrap();
    }

    #[test]
    fn missing_secret_moves_plugin_to_dead() {
        let repo = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write_manifest(
            source.path(),
            r#"
                plugin_type = "external"
                entrypoint = "{root}"
                launch = ["/bin/true"]

                [secrets]
                token = "{root}/t"
            "#,
        );

        let registry = PluginRegistry::for_tests();
        registry
            .load_one(repo.path(), "needs-secret", source.path().to_str().unwrap(), Category::External)
            .unwrap();

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.dead_count(), 1);
    }

    #[test]
    fn external_restarts_twice_then_dies() {
        let repo = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write_manifest(
            source.path(),
            r#"
                plugin_type = "external"
                entrypoint = "{root}"
                launch = ["/bin/false"]
                restart = 2
            "#,
        );

        let registry = PluginRegistry::for_tests();
        registry
            .load_one(repo.path(), "flaky", source.path().to_str().unwrap(), Category::External)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.live_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.dead_count(), 1);
    }

    #[test]
    fn cleanup_stops_every_live_plugin() {
        let repo = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::for_tests();

        for name in ["alpha", "beta"] {
            let source = tempfile::tempdir().unwrap();
            write_manifest(
                source.path(),
                r#"
                    plugin_type = "external"
                    entrypoint = "{root}"
                    launch = ["/bin/sleep", "30"]
                "#,
            );
            registry.load_one(repo.path(), name, source.path().to_str().unwrap(), Category::External).unwrap();
            std::mem::forget(source); // keep the fixture alive for the spawned child's cwd
        }

        assert_eq!(registry.live_count(), 2);

        registry.cleanup();

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.dead_count(), 2);
    }

    #[test]
    fn reacquiring_a_live_name_retires_the_old_record() {
        let repo = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::for_tests();

        let source_a = tempfile::tempdir().unwrap();
        write_manifest(
            source_a.path(),
            r#"
                plugin_type = "external"
                entrypoint = "{root}"
                launch = ["/bin/sleep", "30"]
            "#,
        );
        registry.load_one(repo.path(), "dup", source_a.path().to_str().unwrap(), Category::External).unwrap();
        std::mem::forget(source_a);
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.dead_count(), 0);

        let source_b = tempfile::tempdir().unwrap();
        write_manifest(
            source_b.path(),
            r#"
                plugin_type = "external"
                entrypoint = "{root}"
                launch = ["/bin/sleep", "30"]
            "#,
        );
        registry.load_one(repo.path(), "dup", source_b.path().to_str().unwrap(), Category::External).unwrap();
        std::mem::forget(source_b);

        // the reacquisition retired the first record rather than sitting
        // alongside it in `live`
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.dead_count(), 1);

        registry.cleanup();
        assert_eq!(registry.live_count(), 0);
    }
}
