//! Snapshots of generated configuration and the counts between two of them.

use crate::traits::FileSystem;
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const FUNCTIONS_FILE: &str = "functions.yml";
pub const ROUTING_FILE: &str = "routing.yml";
pub const RESOURCES_FILE: &str = "resources.yml";

/// Resource kinds tracked in `resources.yml`, with the field naming each item
pub const RESOURCE_KINDS: &[(&str, &str)] = &[
    ("dynamodb", "TableName"),
    ("s3", "BucketName"),
    ("layers", "Name"),
];

/// Generated configuration keyed by entry name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub functions: BTreeMap<String, Value>,
    pub routes: BTreeMap<String, Value>,
    pub resources: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ConfigSnapshot {
    pub fn resource(&self, kind: &str) -> Option<&BTreeMap<String, Value>> {
        self.resources.get(kind)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigCounts {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

impl ConfigCounts {
    pub fn unchanged(&self) -> usize {
        self.total.saturating_sub(self.added + self.updated)
    }

    pub fn is_empty(&self) -> bool {
        *self == ConfigCounts::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub functions: ConfigCounts,
    pub routes: ConfigCounts,
    pub resources: BTreeMap<String, ConfigCounts>,
}

impl ConfigDiff {
    /// Rows in display order; resource kinds with nothing to report are left out
    pub fn rows(&self) -> Vec<(String, ConfigCounts)> {
        let mut rows = vec![
            ("Routes".to_string(), self.routes),
            ("Functions".to_string(), self.functions),
        ];
        for (kind, _) in RESOURCE_KINDS {
            if let Some(counts) = self.resources.get(*kind)
                && !counts.is_empty()
            {
                rows.push((format!("Resources.{}", kind), *counts));
            }
        }
        rows
    }
}

/// How a diff is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffView {
    /// Staged configuration merged with fresh output
    #[default]
    Merge,
    /// Fresh output compared to what is already staged
    TemplateDelta,
}

impl DiffView {
    pub fn title(&self) -> &'static str {
        match self {
            DiffView::Merge => "Config merge summary",
            DiffView::TemplateDelta => "Template delta summary",
        }
    }

    pub fn format(&self, counts: &ConfigCounts) -> String {
        match self {
            DiffView::Merge => format_merge_counts(counts),
            DiffView::TemplateDelta => format_template_counts(counts),
        }
    }
}

pub fn format_merge_counts(counts: &ConfigCounts) -> String {
    format!(
        "new {} / updated {} / removed {} (total {})",
        counts.added, counts.updated, counts.removed, counts.total
    )
}

pub fn format_template_counts(counts: &ConfigCounts) -> String {
    format!(
        "new {} / updated {} / unchanged {} (template {})",
        counts.added,
        counts.updated,
        counts.unchanged(),
        counts.total
    )
}

/// Load the snapshot stored in `dir`. Missing files count as empty.
pub fn load_snapshot(fs: &dyn FileSystem, dir: &Path) -> Result<ConfigSnapshot> {
    let mut snapshot = ConfigSnapshot::default();

    if let Some(doc) = load_yaml(fs, &dir.join(FUNCTIONS_FILE))?
        && let Some(functions) = doc.get("functions").and_then(Value::as_mapping)
    {
        snapshot.functions = string_keyed(functions);
    }

    if let Some(doc) = load_yaml(fs, &dir.join(ROUTING_FILE))?
        && let Some(routes) = doc.get("routes").and_then(Value::as_sequence)
    {
        for route in routes {
            if let Some(key) = route_key(route) {
                snapshot.routes.insert(key, route.clone());
            }
        }
    }

    if let Some(doc) = load_yaml(fs, &dir.join(RESOURCES_FILE))?
        && let Some(resources) = doc.get("resources").and_then(Value::as_mapping)
    {
        for (kind, name_field) in RESOURCE_KINDS {
            let items = resources
                .get(*kind)
                .and_then(Value::as_sequence)
                .map(|items| named_items(items, name_field))
                .unwrap_or_default();
            snapshot.resources.insert(kind.to_string(), items);
        }
    }

    Ok(snapshot)
}

pub fn diff(before: &ConfigSnapshot, after: &ConfigSnapshot) -> ConfigDiff {
    let empty = BTreeMap::new();
    let resources = RESOURCE_KINDS
        .iter()
        .map(|(kind, _)| {
            let counts = diff_maps(
                before.resource(kind).unwrap_or(&empty),
                after.resource(kind).unwrap_or(&empty),
            );
            (kind.to_string(), counts)
        })
        .collect();

    ConfigDiff {
        functions: diff_maps(&before.functions, &after.functions),
        routes: diff_maps(&before.routes, &after.routes),
        resources,
    }
}

/// Load both directories and diff them
pub fn diff_config(fs: &dyn FileSystem, before_dir: &Path, after_dir: &Path) -> Result<ConfigDiff> {
    let before = load_snapshot(fs, before_dir)
        .with_context(|| format!("Failed to load config snapshot from {:?}", before_dir))?;
    let after = load_snapshot(fs, after_dir)
        .with_context(|| format!("Failed to load config snapshot from {:?}", after_dir))?;
    Ok(diff(&before, &after))
}

fn diff_maps(before: &BTreeMap<String, Value>, after: &BTreeMap<String, Value>) -> ConfigCounts {
    let mut counts = ConfigCounts {
        total: after.len(),
        ..ConfigCounts::default()
    };
    for (key, value) in after {
        match before.get(key) {
            None => counts.added += 1,
            Some(previous) if previous != value => counts.updated += 1,
            Some(_) => {}
        }
    }
    counts.removed = before.keys().filter(|key| !after.contains_key(*key)).count();
    counts
}

fn load_yaml(fs: &dyn FileSystem, path: &Path) -> Result<Option<Value>> {
    if !fs.exists(path) {
        return Ok(None);
    }
    let content = fs.read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(value))
}

fn string_keyed(mapping: &Mapping) -> BTreeMap<String, Value> {
    mapping
        .iter()
        .filter_map(|(key, value)| key.as_str().map(|k| (k.to_string(), value.clone())))
        .collect()
}

fn route_key(route: &Value) -> Option<String> {
    let path = route.get("path").and_then(Value::as_str).filter(|p| !p.is_empty())?;
    let method = route
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or("GET");
    Some(format!("{}:{}", path, method))
}

fn named_items(items: &[Value], name_field: &str) -> BTreeMap<String, Value> {
    items
        .iter()
        .filter_map(|item| {
            let name = item.get(name_field).and_then(Value::as_str).filter(|n| !n.is_empty())?;
            Some((name.to_string(), item.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockFileSystem, RealFileSystem};
    use std::path::PathBuf;

    const FUNCTIONS: &str = r#"
functions:
  hello:
    image: hello:latest
    timeout: 30
  world:
    image: world:latest
"#;

    const ROUTES: &str = r#"
routes:
  - path: /hello
    function: hello
  - path: /hello
    method: POST
    function: hello
  - function: orphan
"#;

    const RESOURCES: &str = r#"
resources:
  dynamodb:
    - TableName: users
    - TableName: orders
  s3:
    - BucketName: assets
  layers:
    - Name: common
"#;

    fn seeded(dir: &str) -> MockFileSystem {
        MockFileSystem::new()
            .with_file(PathBuf::from(dir).join(FUNCTIONS_FILE), FUNCTIONS)
            .with_file(PathBuf::from(dir).join(ROUTING_FILE), ROUTES)
            .with_file(PathBuf::from(dir).join(RESOURCES_FILE), RESOURCES)
    }

    #[test]
    fn test_load_snapshot_keys_entries() {
        let fs = seeded("/cfg");
        let snapshot = load_snapshot(&fs, Path::new("/cfg")).unwrap();

        assert_eq!(snapshot.functions.keys().collect::<Vec<_>>(), vec!["hello", "world"]);
        assert_eq!(
            snapshot.routes.keys().collect::<Vec<_>>(),
            vec!["/hello:GET", "/hello:POST"]
        );
        assert_eq!(snapshot.resource("dynamodb").unwrap().len(), 2);
        assert!(snapshot.resource("s3").unwrap().contains_key("assets"));
        assert!(snapshot.resource("layers").unwrap().contains_key("common"));
    }

    #[test]
    fn test_missing_directory_is_empty_snapshot() {
        let fs = MockFileSystem::new();
        let snapshot = load_snapshot(&fs, Path::new("/nowhere")).unwrap();
        assert_eq!(snapshot, ConfigSnapshot::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let fs = MockFileSystem::new().with_file("/cfg/functions.yml", "functions: [unclosed");
        assert!(load_snapshot(&fs, Path::new("/cfg")).is_err());
    }

    #[test]
    fn test_diff_against_itself_is_all_zero() {
        let fs = seeded("/cfg");
        let snapshot = load_snapshot(&fs, Path::new("/cfg")).unwrap();
        let result = diff(&snapshot, &snapshot);

        for (_, counts) in [("f", result.functions), ("r", result.routes)] {
            assert_eq!((counts.added, counts.updated, counts.removed), (0, 0, 0));
        }
        for counts in result.resources.values() {
            assert_eq!((counts.added, counts.updated, counts.removed), (0, 0, 0));
        }
    }

    #[test]
    fn test_diff_counts_added_updated_removed() {
        let fs = seeded("/before").with_file(
            "/after/functions.yml",
            r#"
functions:
  hello:
    image: hello:latest
    timeout: 60
  fresh:
    image: fresh:latest
"#,
        );

        let result = diff_config(&fs, Path::new("/before"), Path::new("/after")).unwrap();

        assert_eq!(
            result.functions,
            ConfigCounts {
                added: 1,
                updated: 1,
                removed: 1,
                total: 2
            }
        );
        assert_eq!(result.routes.removed, 2);
        assert_eq!(result.resources["dynamodb"].removed, 2);
    }

    #[test]
    fn test_count_renderings() {
        let counts = ConfigCounts {
            added: 2,
            updated: 1,
            removed: 3,
            total: 5,
        };
        assert_eq!(format_merge_counts(&counts), "new 2 / updated 1 / removed 3 (total 5)");
        assert_eq!(
            format_template_counts(&counts),
            "new 2 / updated 1 / unchanged 2 (template 5)"
        );

        let over = ConfigCounts {
            added: 4,
            updated: 3,
            removed: 0,
            total: 5,
        };
        assert_eq!(over.unchanged(), 0);
    }

    #[test]
    fn test_rows_skip_empty_resource_kinds() {
        let mut result = ConfigDiff::default();
        result.resources.insert("s3".into(), ConfigCounts::default());
        result.resources.insert(
            "layers".into(),
            ConfigCounts {
                added: 1,
                total: 1,
                ..Default::default()
            },
        );
        let keys: Vec<String> = result.rows().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Routes", "Functions", "Resources.layers"]);
    }

    #[test]
    fn test_load_snapshot_from_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FUNCTIONS_FILE), FUNCTIONS).unwrap();
        std::fs::write(dir.path().join(ROUTING_FILE), "").unwrap();

        let snapshot = load_snapshot(&RealFileSystem, dir.path()).unwrap();
        assert_eq!(snapshot.functions.len(), 2);
        assert!(snapshot.routes.is_empty());
    }
}
