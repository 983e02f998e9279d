//! Trap loader: selected when a manifest's declared type is unrecognized,
//! or when the manifest failed to normalize into a known
//! [`crate::config::PluginType`]. Always fails at `run`.

use crate::error::LoadError;
use crate::plugin::PluginRecord;

pub fn run(record: &mut PluginRecord) -> Result<(), LoadError> {
    Err(LoadError::InvalidPluginType(format!("plugin '{}' has no recognized PLUGIN_TYPE", record.name)))
}
