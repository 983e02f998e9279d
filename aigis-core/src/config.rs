//! Top-level configuration and per-plugin manifest loading. Both are flat
//! TOML, decoded via `serde` rather than loaded as an importable module.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::LoadError;

/// The declared plugin type. `InternalRemote` is never written directly in
/// a manifest; `PluginManifest::load` promotes a declared `Internal` to it
/// once it observes a `host` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginType {
    Core,
    Internal,
    InternalLocal,
    InternalRemote,
    External,
}

/// One section of the top-level TOML file: a flat `name = "source uri"`
/// table. An `IndexMap` rather than a `BTreeMap` because the load order
/// within a category must follow the file's own key order, not
/// alphabetical order.
pub type PluginSourceMap = IndexMap<String, String>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemCreds {
    pub login: Option<String>,
    pub password: Option<String>,
}

/// The root configuration document loaded from `aigis -c <path>`.
#[derive(Debug, Default, Deserialize)]
pub struct TopLevelConfig {
    #[serde(default)]
    pub core: PluginSourceMap,
    #[serde(default)]
    pub internal: PluginSourceMap,
    #[serde(rename = "internal-local", default)]
    pub internal_local: PluginSourceMap,
    #[serde(rename = "internal-remote", default)]
    pub internal_remote: PluginSourceMap,
    #[serde(default)]
    pub external: PluginSourceMap,
    #[serde(default)]
    pub system: SystemCreds,
}

impl TopLevelConfig {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|_| LoadError::ConfigMissing(path.to_path_buf()))?;
        toml::from_str(&raw).map_err(|e| LoadError::Unknown(format!("invalid top-level config: {e}")))
    }
}

fn empty_secrets() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn empty_argv() -> Vec<String> {
    Vec::new()
}

/// A plugin's own declarative manifest, read from
/// `<root>/AIGIS/AIGIS.config`. Optional fields are normalized to their
/// defaults via `#[serde(default = ...)]` rather than read with ad hoc
/// fallbacks at each use site.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin_type: PluginType,
    pub entrypoint: String,
    #[serde(default)]
    pub launch: Vec<String>,
    #[serde(default)]
    pub requirement_file: String,
    #[serde(default = "empty_argv")]
    pub requirement_command: Vec<String>,
    #[serde(default)]
    pub system_requirements: Vec<String>,
    #[serde(default = "empty_secrets")]
    pub secrets: BTreeMap<String, String>,
    pub host: Option<String>,
    #[serde(default)]
    pub restart: u32,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl PluginManifest {
    pub fn load(root: &Path) -> Result<Self, LoadError> {
        let manifest_path = root.join("AIGIS").join("AIGIS.config");
        let raw = std::fs::read_to_string(&manifest_path)
            .map_err(|_| LoadError::ConfigMissing(manifest_path.clone()))?;
        let mut manifest: PluginManifest =
            toml::from_str(&raw).map_err(|e| LoadError::Unknown(format!("invalid manifest {}: {e}", manifest_path.display())))?;
        // Promote `internal` -> `internal-remote` when a host is configured.
        if manifest.plugin_type == PluginType::Internal {
            manifest.plugin_type =
                if manifest.host.is_some() { PluginType::InternalRemote } else { PluginType::InternalLocal };
        }
        Ok(manifest)
    }

    /// Substitutes `{root}` into every template-bearing field. Idempotent:
    /// a field with no remaining `{root}` occurrence is left untouched on a
    /// second call.
    pub fn contextualize(&mut self, root: &Path) {
        let root_str = root.to_string_lossy().to_string();
        self.entrypoint = substitute(&self.entrypoint, &root_str);
        if matches!(self.plugin_type, PluginType::InternalLocal) {
            self.launch = self.launch.iter().map(|a| substitute(a, &root_str)).collect();
        }
        self.requirement_file = substitute(&self.requirement_file, &root_str);
        for dest in self.secrets.values_mut() {
            *dest = substitute(dest, &root_str);
        }
    }

    pub fn secret_destination(&self, key: &str) -> Option<PathBuf> {
        self.secrets.get(key).map(PathBuf::from)
    }
}

fn substitute(template: &str, root: &str) -> String {
    template.replace("{root}", root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contextualize_is_idempotent() {
        let mut m = PluginManifest {
            plugin_type: PluginType::InternalLocal,
            entrypoint: "{root}/src".into(),
            launch: vec!["{root}/launch.so".into()],
            requirement_file: "{root}/reqs.txt".into(),
            requirement_command: vec![],
            system_requirements: vec![],
            secrets: BTreeMap::from([("token".to_string(), "{root}/secret".to_string())]),
            host: None,
            restart: 0,
            skills: vec![],
        };
        m.contextualize(Path::new("/plugins/foo"));
        let first = m.entrypoint.clone();
        m.contextualize(Path::new("/plugins/foo"));
        assert_eq!(first, m.entrypoint);
        assert!(!m.entrypoint.contains("{root}"));
        assert!(!m.launch[0].contains("{root}"));
        assert!(!m.secrets["token"].contains("{root}"));
    }

    #[test]
    fn internal_promotes_to_remote_with_host() {
        let toml_src = r#"
            plugin_type = "internal"
            entrypoint = "{root}"
            host = "10.0.0.5"
        "#;
        let manifest: PluginManifest = toml::from_str(toml_src).unwrap();
        assert_eq!(manifest.host.as_deref(), Some("10.0.0.5"));
    }

    #[rstest::rstest]
    #[case("core", PluginType::Core)]
    #[case("internal", PluginType::Internal)]
    #[case("internal-local", PluginType::InternalLocal)]
    #[case("internal-remote", PluginType::InternalRemote)]
    #[case("external", PluginType::External)]
    fn plugin_type_parses_every_kebab_case_variant(#[case] raw: &str, #[case] expected: PluginType) {
        let toml_src = format!(r#"plugin_type = "{raw}"{}"#, "\nentrypoint = \"{root}\"");
        let manifest: PluginManifest = toml::from_str(&toml_src).unwrap();
        assert_eq!(manifest.plugin_type, expected);
    }
}
