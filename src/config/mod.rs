//! CLI-wide settings file: recent templates and per-template deploy defaults.

use crate::traits::FileSystem;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;
pub const RECENT_TEMPLATE_LIMIT: usize = 10;
const CONFIG_FILE_NAME: &str = "config.yaml";
const HOME_DIR_NAME: &str = ".sbx";

/// Last confirmed inputs for one template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDefaults {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_dir: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_templates: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy_defaults: BTreeMap<String, StoredDefaults>,
    /// Settings owned by other commands, kept as-is on rewrite
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

impl GlobalConfig {
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            ..Default::default()
        }
    }

    pub fn defaults_for(&self, template: &Path) -> Option<&StoredDefaults> {
        self.deploy_defaults.get(&template_key(template))
    }

    /// Store the defaults for a template and move it to the front of the recent list
    pub fn remember(&mut self, template: &Path, defaults: StoredDefaults) {
        let key = template_key(template);
        self.recent_templates = crate::deploy::template::update_history(
            &self.recent_templates,
            &key,
            RECENT_TEMPLATE_LIMIT,
        );
        self.deploy_defaults.insert(key, defaults);
        if self.version == 0 {
            self.version = CONFIG_VERSION;
        }
    }
}

fn template_key(template: &Path) -> String {
    template.to_string_lossy().into_owned()
}

/// Locate the settings file.
///
/// Order: `SBX_CONFIG_PATH`, then `SBX_CONFIG_HOME/config.yaml`, then
/// `~/.sbx/config.yaml`.
pub fn config_path(lookup: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(path) = get("SBX_CONFIG_PATH") {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            return Ok(path);
        }
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        return Ok(cwd.join(path));
    }
    if let Some(home) = get("SBX_CONFIG_HOME") {
        return Ok(PathBuf::from(home).join(CONFIG_FILE_NAME));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(HOME_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Reads and writes the settings file through the filesystem seam
pub struct ConfigStore<'a> {
    fs: &'a dyn FileSystem,
    path: PathBuf,
}

impl<'a> ConfigStore<'a> {
    pub fn new(fs: &'a dyn FileSystem, path: PathBuf) -> Self {
        Self { fs, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file loads as an empty config
    pub fn load(&self) -> Result<GlobalConfig> {
        if !self.fs.exists(&self.path) {
            return Ok(GlobalConfig::new());
        }
        let content = self.fs.read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(GlobalConfig::new());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", self.path))
    }

    pub fn save(&self, config: &GlobalConfig) -> Result<()> {
        let content = serde_yaml::to_string(config).context("Failed to serialize config")?;
        self.fs.write(&self.path, &content)?;
        tracing::debug!(path = %self.path.display(), "saved global config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockFileSystem;
    use std::collections::HashMap;

    #[test]
    fn test_config_path_precedence() {
        let vars: HashMap<&str, &str> = [
            ("SBX_CONFIG_PATH", "/etc/sbx.yaml"),
            ("SBX_CONFIG_HOME", "/opt/sbx"),
        ]
        .into();
        let path = config_path(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(path, PathBuf::from("/etc/sbx.yaml"));

        let path = config_path(|k| (k == "SBX_CONFIG_HOME").then(|| "/opt/sbx".to_string())).unwrap();
        assert_eq!(path, PathBuf::from("/opt/sbx/config.yaml"));
    }

    #[test]
    fn test_missing_file_loads_empty_config() {
        let fs = MockFileSystem::new();
        let store = ConfigStore::new(&fs, PathBuf::from("/home/u/.sbx/config.yaml"));
        let config = store.load().unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert!(config.recent_templates.is_empty());
    }

    #[test]
    fn test_unknown_keys_survive_rewrite() {
        let fs = MockFileSystem::new().with_file(
            "/cfg.yaml",
            "version: 1\nrepo_path: /src/sbx\nprojects:\n  demo:\n    path: /work/demo\n",
        );
        let store = ConfigStore::new(&fs, PathBuf::from("/cfg.yaml"));

        let mut config = store.load().unwrap();
        config.remember(
            Path::new("/work/demo/template.yaml"),
            StoredDefaults {
                env: "dev".into(),
                ..Default::default()
            },
        );
        store.save(&config).unwrap();

        let written = fs.get_file_contents(Path::new("/cfg.yaml")).unwrap();
        assert!(written.contains("repo_path: /src/sbx"));
        assert!(written.contains("/work/demo/template.yaml"));

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let fs = MockFileSystem::new().with_file("/cfg.yaml", "version: [1");
        let store = ConfigStore::new(&fs, PathBuf::from("/cfg.yaml"));
        assert!(store.load().is_err());
    }

    #[test]
    fn test_remember_caps_recent_templates() {
        let mut config = GlobalConfig::new();
        config.recent_templates = (0..RECENT_TEMPLATE_LIMIT).map(|i| format!("/t{}/template.yaml", i)).collect();

        config.remember(Path::new("/new/template.yaml"), StoredDefaults::default());

        assert_eq!(config.recent_templates.len(), RECENT_TEMPLATE_LIMIT);
        assert_eq!(config.recent_templates[0], "/new/template.yaml");
        assert!(!config.recent_templates.contains(&"/t9/template.yaml".to_string()));
        assert_eq!(config.recent_templates[1], "/t0/template.yaml");
    }
}
