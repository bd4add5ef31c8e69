use anyhow::{Context, Result};
#[cfg(test)]
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::RwLock;

/// Trait for filesystem access so template, config and snapshot loading can run against mocks
pub trait FileSystem: Send + Sync {
    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write string contents to file, creating parent directories
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Check if path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Check if path is a file
    fn is_file(&self, path: &Path) -> bool;

    /// Direct children of a directory
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Real filesystem implementation using std::fs
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }

        std::fs::write(path, contents).with_context(|| format!("Failed to write file: {:?}", path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {:?}", path))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            paths.push(entry.path());
        }
        paths.sort();

        Ok(paths)
    }
}

#[cfg(test)]
#[derive(Default)]
struct MockTree {
    files: BTreeMap<PathBuf, String>,
    directories: BTreeSet<PathBuf>,
}

#[cfg(test)]
impl MockTree {
    fn add_ancestors(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            self.directories.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }
}

/// In-memory filesystem for tests
#[cfg(test)]
pub struct MockFileSystem {
    tree: RwLock<MockTree>,
}

#[cfg(test)]
impl MockFileSystem {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(MockTree::default()),
        }
    }

    /// Seed a file, creating its parent directories
    pub fn with_file(self, path: impl AsRef<Path>, contents: &str) -> Self {
        self.add_file(path, contents);
        self
    }

    /// Seed an empty directory
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut tree = self.tree.write().unwrap();
        tree.directories.insert(path.to_path_buf());
        tree.add_ancestors(path);
        drop(tree);
        self
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        let path = path.as_ref();
        let mut tree = self.tree.write().unwrap();
        tree.add_ancestors(path);
        tree.files.insert(path.to_path_buf(), contents.to_string());
    }

    /// Captured file contents for assertions
    pub fn get_file_contents(&self, path: &Path) -> Option<String> {
        self.tree.read().unwrap().files.get(path).cloned()
    }
}

#[cfg(test)]
impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.tree
            .read()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .with_context(|| format!("File not found in mock filesystem: {:?}", path))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.tree.read().unwrap().directories.contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.tree.read().unwrap().files.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_dir(path) {
            anyhow::bail!("Directory not found in mock filesystem: {:?}", path);
        }
        let tree = self.tree.read().unwrap();
        let mut entries: Vec<PathBuf> = tree
            .files
            .keys()
            .chain(tree.directories.iter())
            .filter(|entry| entry.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_read_dir_lists_direct_children_only() {
        let fs = MockFileSystem::new()
            .with_file("/work/app/template.yaml", "x")
            .with_file("/work/app/nested/deep.yaml", "y")
            .with_dir("/work/empty");

        let entries = fs.read_dir(Path::new("/work")).unwrap();
        assert_eq!(
            entries,
            vec![PathBuf::from("/work/app"), PathBuf::from("/work/empty")]
        );
    }

    #[test]
    fn test_real_filesystem_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/config.yaml");

        RealFileSystem.write(&target, "version: 1\n").unwrap();

        assert!(RealFileSystem.is_file(&target));
        assert_eq!(RealFileSystem.read_to_string(&target).unwrap(), "version: 1\n");
    }
}
