// Config store - persistence of the flat configuration record

use super::StoredConfig;
use crate::error::{KeeperError, Result};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

/// Distinguishes temp files of concurrent writers
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Holds the current configuration record and its file on disk
///
/// The record is rewritten wholesale on every save.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<StoredConfig>,
    /// Serializes merge, write and replace
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Create a store with default values; nothing is read from disk
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, StoredConfig::default())
    }

    /// Create a store around an already-built record
    pub fn with_config<P: AsRef<Path>>(path: P, config: StoredConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            current: RwLock::new(config),
            writer: Mutex::new(()),
        }
    }

    /// Create a store and load the file if it exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Snapshot of the current record
    pub fn current(&self) -> StoredConfig {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the file; a missing file yields defaults
    pub fn load(&self) -> Result<StoredConfig> {
        let _writer = self.lock_writer();
        let config = if self.path.exists() {
            let contents = fs::read_to_string(&self.path)
                .map_err(|e| KeeperError::ConfigError(format!("Failed to read config file: {}", e)))?;
            let config = Self::parse(&contents, Format::for_path(&self.path))?;
            config.validate()?;
            config
        } else {
            tracing::info!(
                "Config file {} not found, using defaults",
                self.path.display()
            );
            StoredConfig::default()
        };

        self.replace(config.clone());
        Ok(config)
    }

    fn parse(contents: &str, format: Format) -> Result<StoredConfig> {
        match format {
            Format::Json => serde_json::from_str(contents)
                .map_err(|e| KeeperError::InvalidConfig(format!("Failed to parse JSON: {}", e))),
            Format::Toml => toml::from_str(contents)
                .map_err(|e| KeeperError::InvalidConfig(format!("Failed to parse TOML: {}", e))),
        }
    }

    /// Validate and persist a record, then make it current
    pub fn save(&self, config: &StoredConfig) -> Result<()> {
        let _writer = self.lock_writer();
        self.write_locked(config)
    }

    fn write_locked(&self, config: &StoredConfig) -> Result<()> {
        config.validate()?;

        let contents = match Format::for_path(&self.path) {
            Format::Json => serde_json::to_string_pretty(config)
                .map_err(|e| KeeperError::SerializationError(e.to_string()))?,
            Format::Toml => toml::to_string_pretty(config)
                .map_err(|e| KeeperError::SerializationError(e.to_string()))?,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    KeeperError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        // Write to a temporary file first, then rename over the target
        let temp_path = self.temp_path();
        {
            let file = File::create(&temp_path).map_err(|e| {
                KeeperError::ConfigError(format!("Failed to create temp config file: {}", e))
            })?;
            let mut writer = BufWriter::new(file);
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(KeeperError::ConfigError(format!(
                "Failed to rename temp config file: {}",
                e
            )));
        }

        self.replace(config.clone());
        Ok(())
    }

    /// Merge key/values into the current record and persist the result
    pub fn update(&self, patch: &Map<String, Value>) -> Result<StoredConfig> {
        let _writer = self.lock_writer();
        let updated = self.current().apply_patch(patch)?;
        self.write_locked(&updated)?;

        tracing::info!(
            keys = ?patch.keys().collect::<Vec<_>>(),
            "Configuration saved to {}",
            self.path.display()
        );

        Ok(updated)
    }

    /// Get the path to the config file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let unique = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), unique))
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn replace(&self, config: StoredConfig) {
        match self.current.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::open(temp_dir.path().join("labkeeper.json")).unwrap();

        assert_eq!(store.current().jupyter_port, 8888);
        assert!(store.current().auto_restart);
    }

    #[test]
    fn test_save_and_load_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labkeeper.json");
        let store = ConfigStore::new(&path);

        let mut config = store.current();
        config.jupyter_port = 9001;
        config.use_notebook = true;
        store.save(&config).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.current().jupyter_port, 9001);
        assert!(reopened.current().use_notebook);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_save_and_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labkeeper.toml");
        let store = ConfigStore::new(&path);

        let mut config = store.current();
        config.max_restarts = 7;
        store.save(&config).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("max_restarts = 7"));

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.current().max_restarts, 7);
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labkeeper.json");
        fs::write(&path, "{ not json").unwrap();

        let result = ConfigStore::open(&path);
        assert!(matches!(result, Err(KeeperError::InvalidConfig(_))));
    }

    #[test]
    fn test_save_rejects_invalid_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path().join("labkeeper.json"));

        let mut config = store.current();
        config.check_interval = 10;

        assert!(store.save(&config).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_update_rewrites_file_wholesale() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("labkeeper.json");
        let store = ConfigStore::new(&path);

        let patch = json!({"jupyter_port": 9300, "language": "en"});
        let updated = store.update(patch.as_object().unwrap()).unwrap();
        assert_eq!(updated.jupyter_port, 9300);

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["jupyter_port"], 9300);
        assert_eq!(on_disk["language"], "en");
        assert_eq!(on_disk["max_restarts"], 3);
    }

    #[test]
    fn test_concurrent_updates_are_all_kept() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labkeeper.json");
        let store = std::sync::Arc::new(ConfigStore::new(&path));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..10 {
                        let patch = json!({ (format!("key_{}_{}", i, round)): round });
                        store.update(patch.as_object().unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let current = store.current();
        let on_disk = ConfigStore::open(&path).unwrap().current();
        for i in 0..8 {
            for round in 0..10 {
                let key = format!("key_{}_{}", i, round);
                assert_eq!(current.extra.get(&key), Some(&json!(round)));
                assert_eq!(on_disk.extra.get(&key), Some(&json!(round)));
            }
        }

        // Only the config file remains, no stray temp files
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_env_references_survive_load_and_save() {
        std::env::set_var("LABKEEPER_STORE_TEST_ROOT", "/srv/labkeeper");
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("labkeeper.json");
        fs::write(&path, r#"{"project_dir": "$LABKEEPER_STORE_TEST_ROOT/notebooks"}"#).unwrap();

        let store = ConfigStore::open(&path).unwrap();
        assert_eq!(
            store.current().project_dir,
            "$LABKEEPER_STORE_TEST_ROOT/notebooks"
        );
        assert_eq!(
            store.current().expanded().project_dir,
            "/srv/labkeeper/notebooks"
        );

        let patch = json!({"max_restarts": 4});
        store.update(patch.as_object().unwrap()).unwrap();

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["project_dir"], "$LABKEEPER_STORE_TEST_ROOT/notebooks");
        assert_eq!(on_disk["max_restarts"], 4);
    }
}
