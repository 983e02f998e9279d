/// A handle to a single plugin's log sink, threaded into every skill call so
/// plugin code never has to know where its output ends up.
///
/// Built on `tracing` spans/targets rather than a class-based logger: the
/// two extra severities this host needs (`BOOT`, `SHUTDOWN`) are modeled as
/// `tracing` events carried under dedicated targets, which a subscriber can
/// filter on exactly as it would a level.
#[derive(Clone)]
pub struct PluginLog {
    plugin_name: &'static str,
}

impl PluginLog {
    pub fn new(plugin_name: &'static str) -> Self {
        PluginLog { plugin_name }
    }

    pub fn name(&self) -> &'static str {
        self.plugin_name
    }

    pub fn info(&self, msg: &str) {
        tracing::info!(plugin = self.plugin_name, "{}", msg);
    }

    pub fn warning(&self, msg: &str) {
        tracing::warn!(plugin = self.plugin_name, "{}", msg);
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(plugin = self.plugin_name, "{}", msg);
    }

    /// Emitted at plugin-lifecycle boundaries (registration, acquisition,
    /// deployment) — this host's custom `BOOT` severity.
    pub fn boot(&self, msg: &str) {
        tracing::info!(target: "aigis::boot", plugin = self.plugin_name, "{}", msg);
    }

    /// Emitted on bury/termination — this host's custom `SHUTDOWN` severity.
    pub fn shutdown(&self, msg: &str) {
        tracing::warn!(target: "aigis::shutdown", plugin = self.plugin_name, "{}", msg);
    }
}
