//! Core loader: in-process `cdylib` plugin, `dlopen`'d directly into the
//! host.

use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::error::LoadError;
use crate::plugin::PluginRecord;
use crate::skills::Skills;

const CONSTRUCTOR_SYMBOL: &[u8] = b"_aigis_plugin_create";

/// Locates `<root>/AIGIS/AIGIS.core`, `dlopen`s it, calls the exported
/// constructor, and injects the returned skills into the Skills Registry.
pub fn run(record: &mut PluginRecord, skills: &Arc<Skills>) -> Result<(), LoadError> {
    let path = artifact_path(record)?;
    let plugin = load_plugin(&path)?;
    let log = aigis_plugin_api::PluginLog::new(Box::leak(record.name.clone().into_boxed_str()));
    skills.learn(&record.name, log, plugin.skills())?;
    Ok(())
}

pub fn artifact_path(record: &PluginRecord) -> Result<std::path::PathBuf, LoadError> {
    let path = record.root.join("AIGIS").join("AIGIS.core");
    if !path.exists() {
        return Err(LoadError::InvalidPluginType(format!(
            "no core injector artifact at {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Loads the artifact and returns a boxed plugin instance. The library
/// handle is leaked deliberately: a `cdylib` loaded for the process
/// lifetime of a `core` plugin is never unloaded short of process exit,
/// matching the source's "import a module, never un-import it" behavior.
pub fn load_plugin(path: &std::path::Path) -> Result<Box<dyn aigis_plugin_api::CorePlugin>, LoadError> {
    unsafe {
        let lib = Library::new(path).map_err(|e| LoadError::Unknown(format!("dlopen failed: {e}")))?;
        let ctor: Symbol<unsafe extern "C" fn() -> *mut dyn aigis_plugin_api::CorePlugin> = lib
            .get(CONSTRUCTOR_SYMBOL)
            .map_err(|e| LoadError::InvalidPluginType(format!("missing constructor symbol: {e}")))?;
        let raw = ctor();
        std::mem::forget(lib);
        Ok(Box::from_raw(raw))
    }
}
