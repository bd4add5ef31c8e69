//! Template path handling, recent-template history and parameter definitions.

use crate::deploy::DeployInputError;
use crate::traits::FileSystem;
use anyhow::{Context, Result};
use serde_yaml::Value;
use std::path::{Component, Path, PathBuf};

pub const TEMPLATE_FILE_NAMES: &[&str] = &["template.yaml", "template.yml"];
pub const MANUAL_ENTRY_OPTION: &str = "Enter path...";

/// Directories never offered as template candidates
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".sbx",
    "node_modules",
    ".venv",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
];

/// Expand a leading `~` or `~/`; `~user` is left alone
pub fn expand_home(raw: &str) -> Result<PathBuf> {
    let Some(rest) = raw.strip_prefix('~') else {
        return Ok(PathBuf::from(raw));
    };
    if !rest.is_empty() && !rest.starts_with('/') && !rest.starts_with(std::path::MAIN_SEPARATOR) {
        return Ok(PathBuf::from(raw));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(rest.trim_start_matches(['/', std::path::MAIN_SEPARATOR])))
}

/// Lexically clean a path: drop `.` and fold `..` where possible
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Turn operator input into an absolute template file path.
///
/// Directories resolve to the first template file they contain.
pub fn normalize_template_path(fs: &dyn FileSystem, raw: &str, working_dir: &Path) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DeployInputError::missing("template").into());
    }
    let expanded = expand_home(raw)?;
    let path = if expanded.is_absolute() {
        clean_path(&expanded)
    } else {
        clean_path(&working_dir.join(expanded))
    };

    if fs.is_file(&path) {
        return Ok(path);
    }
    if !fs.is_dir(&path) {
        return Err(DeployInputError::TemplateNotFound { path }.into());
    }
    TEMPLATE_FILE_NAMES
        .iter()
        .map(|name| path.join(name))
        .find(|candidate| fs.is_file(candidate))
        .ok_or_else(|| DeployInputError::AmbiguousTemplateDirectory { path }.into())
}

pub fn has_template_file(fs: &dyn FileSystem, dir: &Path) -> bool {
    TEMPLATE_FILE_NAMES.iter().any(|name| fs.is_file(&dir.join(name)))
}

/// Subdirectories of the working directory that hold a template file
pub fn discover_candidates(fs: &dyn FileSystem, working_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs.read_dir(working_dir) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter(|entry| fs.is_dir(entry))
        .filter(|entry| {
            entry
                .file_name()
                .map(|name| !SKIPPED_DIRS.iter().any(|skip| name == *skip))
                .unwrap_or(false)
        })
        .filter(|entry| has_template_file(fs, entry))
        .map(|entry| entry.to_string_lossy().into_owned())
        .collect()
}

/// Recent templates that still exist, deduplicated and capped
pub fn load_history(fs: &dyn FileSystem, recent: &[String], limit: usize) -> Vec<String> {
    let mut history: Vec<String> = Vec::new();
    for entry in recent.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if history.len() >= limit {
            break;
        }
        if history.iter().any(|h| h == entry) || !fs.exists(Path::new(entry)) {
            continue;
        }
        history.push(entry.to_string());
    }
    history
}

/// Previous path, then history, then candidates, without repeats
pub fn build_suggestions(previous: Option<&str>, history: &[String], candidates: &[String]) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();
    let all = previous
        .into_iter()
        .chain(history.iter().map(String::as_str))
        .chain(candidates.iter().map(String::as_str));
    for value in all.map(str::trim).filter(|v| !v.is_empty()) {
        if !suggestions.iter().any(|s| s == value) {
            suggestions.push(value.to_string());
        }
    }
    suggestions
}

/// Put `path` first, drop its older occurrence and evict past `limit`
pub fn update_history(history: &[String], path: &str, limit: usize) -> Vec<String> {
    let path = path.trim();
    if path.is_empty() {
        return history.to_vec();
    }
    let mut next: Vec<String> = Vec::with_capacity(limit);
    for entry in std::iter::once(path).chain(history.iter().map(|h| h.trim())) {
        if entry.is_empty() || next.iter().any(|n| n == entry) {
            continue;
        }
        if limit > 0 && next.len() >= limit {
            break;
        }
        next.push(entry.to_string());
    }
    next
}

/// A parameter declared in the template's `Parameters` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParameter {
    pub name: String,
    pub kind: String,
    pub default: Option<String>,
    pub description: Option<String>,
    pub allowed_values: Vec<String>,
}

impl TemplateParameter {
    /// Free-form strings may be left empty unless an allow-list says otherwise
    pub fn allows_empty(&self) -> bool {
        if !self.kind.trim().eq_ignore_ascii_case("String") {
            return false;
        }
        self.allowed_values.is_empty() || self.allowed_values.iter().any(|v| v.trim().is_empty())
    }

    pub fn validate(&self, value: &str) -> Result<(), DeployInputError> {
        if value.is_empty() && self.default.is_none() && !self.allows_empty() {
            return Err(DeployInputError::InvalidParameterValue {
                name: self.name.clone(),
                reason: "requires a value".to_string(),
            });
        }
        if self.allowed_values.is_empty() || self.allowed_values.iter().any(|v| v == value) {
            return Ok(());
        }
        let shown: Vec<&str> = self
            .allowed_values
            .iter()
            .map(|v| if v.trim().is_empty() { "''" } else { v.as_str() })
            .collect();
        Err(DeployInputError::InvalidParameterValue {
            name: self.name.clone(),
            reason: format!("must be one of [{}]", shown.join(", ")),
        })
    }

    /// Prompt label: name plus description and allow-list when present
    pub fn label(&self) -> String {
        let mut label = self.name.clone();
        if let Some(description) = &self.description {
            label = format!("{} ({})", label, description);
        }
        if !self.allowed_values.is_empty() {
            label = format!("{} {{{}}}", label, self.allowed_values.join("|"));
        }
        label
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        other => serde_yaml::to_string(other).ok().map(|s| s.trim().to_string()),
    }
}

/// Parameter definitions sorted by name
pub fn extract_parameters(content: &str) -> Result<Vec<TemplateParameter>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: Value = serde_yaml::from_str(content).context("Failed to decode template")?;
    let Some(params) = doc.get("Parameters").and_then(Value::as_mapping) else {
        return Ok(Vec::new());
    };

    let mut out: Vec<TemplateParameter> = Vec::new();
    for (name, definition) in params {
        let (Some(name), Some(definition)) = (name.as_str(), definition.as_mapping()) else {
            continue;
        };
        let text = |key: &str| {
            definition
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };

        let mut allowed_values: Vec<String> = Vec::new();
        if let Some(items) = definition.get("AllowedValues").and_then(Value::as_sequence) {
            for item in items {
                let value = scalar_to_string(item).unwrap_or_default().trim().to_string();
                if !allowed_values.contains(&value) {
                    allowed_values.push(value);
                }
            }
        }

        out.push(TemplateParameter {
            name: name.to_string(),
            kind: text("Type").unwrap_or_default(),
            default: definition.get("Default").and_then(scalar_to_string),
            description: text("Description"),
            allowed_values,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

pub fn load_parameters(fs: &dyn FileSystem, template: &Path) -> Result<Vec<TemplateParameter>> {
    let content = fs
        .read_to_string(template)
        .with_context(|| format!("Failed to read template {:?}", template))?;
    extract_parameters(&content).with_context(|| format!("Invalid template {:?}", template))
}
