//! Key-value storage backends for snapshots.

use std::collections::HashMap;

use crate::{StateError, StateResult};

/// Minimal key-value contract in the shape of browser local storage.
pub trait KeyValueStore {
    /// Fetch a value. `Ok(None)` when the key is absent.
    fn get_item(&self, key: &str) -> StateResult<Option<String>>;

    fn set_item(&mut self, key: &str, value: &str) -> StateResult<()>;

    fn remove_item(&mut self, key: &str) -> StateResult<()>;
}

/// In-memory store for testing and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> StateResult<Option<String>> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> StateResult<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> StateResult<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// One-file-per-key store under a data directory.
#[cfg(not(target_arch = "wasm32"))]
pub struct FileStore {
    root: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> StateResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StateError::Storage(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Store rooted at the platform data directory.
    pub fn default_location() -> StateResult<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| StateError::Storage("no data directory available".to_string()))?;
        Self::new(base.join("terrasketch").join("state"))
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        // Keys become file names; anything unusual is mapped to '_'.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> StateResult<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> StateResult<()> {
        let path = self.path_for(key);
        std::fs::write(&path, value)
            .map_err(|e| StateError::Storage(format!("write {}: {e}", path.display())))
    }

    fn remove_item(&mut self, key: &str) -> StateResult<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Storage(format!("remove {}: {e}", path.display()))),
        }
    }
}
