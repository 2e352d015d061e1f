//! Persistent key/value storage.
//!
//! Values are stored as JSON files, one per key, in the platform config
//! directory by default:
//!   - Linux: `~/.config/chatdesk/`
//!   - macOS: `~/Library/Application Support/chatdesk/`
//!   - Windows: `%APPDATA%\chatdesk\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON-file storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted at an explicit directory. The directory is created on first write.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage under the platform config directory.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::at(dir.join("chatdesk")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a value under `key`.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        self.save_raw(key, &json)
    }

    /// Load a value.
    ///
    /// Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring unreadable stored value");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).is_file()
    }

    pub fn save_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        std::fs::write(self.file_path(key), value)?;
        Ok(())
    }

    pub fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path().join("nested"));

        assert!(!storage.exists("greeting"));
        storage.save("greeting", &vec!["halo", "kak"]).unwrap();
        assert!(storage.exists("greeting"));
        assert_eq!(
            storage.load::<Vec<String>>("greeting"),
            Some(vec!["halo".to_string(), "kak".to_string()])
        );

        storage.remove("greeting");
        assert_eq!(storage.load::<Vec<String>>("greeting"), None);
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path());
        storage.save("chat/messages:42", &1).unwrap();
        assert!(tmp.path().join("chat_messages_42.json").is_file());
        assert_eq!(storage.load::<u32>("chat/messages:42"), Some(1));
    }

    #[test]
    fn unreadable_values_load_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Storage::at(tmp.path());
        storage.save_raw("broken", "{not json").unwrap();
        assert_eq!(storage.load::<u32>("broken"), None);
    }
}
