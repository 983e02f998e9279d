//! Top-level orchestration: ties the Registry, Skills Registry, Broker, and
//! Scheduler together into one running instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::broker;
use crate::config::TopLevelConfig;
use crate::plugin::Category;
use crate::registry::PluginRegistry;
use crate::skills::Skills;
use crate::watchdog::Scheduler;

pub struct Supervisor {
    pub registry: Arc<PluginRegistry>,
    pub skills: Arc<Skills>,
    repo_root: PathBuf,
}

impl Supervisor {
    /// Builds the registry/skills/scheduler triple and starts the
    /// Capability Broker, which must be up before any plugin loads so that
    /// child processes can immediately reach it.
    pub fn bootstrap(repo_root: &Path) -> anyhow::Result<Self> {
        let scheduler = Scheduler::start()?;
        let registry = Arc::new(PluginRegistry::new(scheduler));
        let skills = Arc::new(Skills::new(Arc::clone(&registry)));
        registry.attach_skills(Arc::clone(&skills));

        broker::start(broker::DEFAULT_BIND, Arc::clone(&skills))?;

        Ok(Supervisor { registry, skills, repo_root: repo_root.to_path_buf() })
    }

    /// Loads every configured plugin in the fixed category order — core,
    /// internal, internal-local, internal-remote, external. Within a
    /// category, insertion order from the configuration file is respected.
    pub fn load_all(&self, config: &TopLevelConfig) {
        self.registry.attach_system_creds(config.system.clone());
        let categories = [
            (Category::Core, &config.core),
            (Category::Internal, &config.internal),
            (Category::InternalLocal, &config.internal_local),
            (Category::InternalRemote, &config.internal_remote),
            (Category::External, &config.external),
        ];
        for (category, sources) in categories {
            self.registry.load_all(&self.repo_root, category, sources);
        }
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Shutdown path for SIGINT: the supervisor stops iterating and cleans
    /// up the registry.
    pub fn shutdown(&self) {
        self.registry.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_starts_with_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::bootstrap(dir.path()).expect("bootstrap succeeds");
        assert_eq!(supervisor.live_count(), 0);
        supervisor.shutdown();
    }
}
