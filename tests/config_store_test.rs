// Integration test for configuration file support

use labkeeper::config::{ConfigStore, LaunchConfig, LaunchOverrides, Mode, StoredConfig};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_load_json_config_with_aliases() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("labkeeper.json");

    let json_content = format!(
        r#"{{
            "python_executable": "/bin/sh",
            "port": 9999,
            "project_dir": "{}",
            "use_notebook": true,
            "args": "--debug --no-mathjax",
            "check_interval": 2000,
            "max_restarts": 7
        }}"#,
        temp_dir.path().display()
    );
    fs::write(&config_path, json_content).unwrap();

    let store = ConfigStore::open(&config_path).unwrap();
    let config = store.current();

    assert_eq!(config.python_executable, "/bin/sh");
    assert_eq!(config.jupyter_port, 9999);
    assert!(config.use_notebook);
    assert_eq!(config.mode(), Mode::Notebook);
    assert_eq!(config.args, vec!["--debug", "--no-mathjax"]);
    assert_eq!(config.check_interval, 2000);
    assert_eq!(config.max_restarts, 7);
    assert!(config.auto_restart);
}

#[test]
fn test_load_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("labkeeper.toml");

    let toml_content = r#"
        python_executable = "/bin/sh"
        jupyter_port = 8890
        project_dir = "/tmp"
        auto_start = true
        args = ["--ServerApp.log_level=DEBUG"]
        library_dirs = ["/opt/lib"]

        [env]
        JUPYTER_CONFIG_DIR = "/opt/jupyter"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = ConfigStore::open(&config_path).unwrap().current();
    assert_eq!(config.jupyter_port, 8890);
    assert!(config.auto_start);
    assert_eq!(config.args, vec!["--ServerApp.log_level=DEBUG"]);
    assert_eq!(config.library_dirs, vec![PathBuf::from("/opt/lib")]);
    assert_eq!(
        config.env.get("JUPYTER_CONFIG_DIR"),
        Some(&"/opt/jupyter".to_string())
    );
}

#[test]
fn test_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let store = ConfigStore::open(temp_dir.path().join("absent.json")).unwrap();

    let config = store.current();
    assert_eq!(config.jupyter_port, 8888);
    assert_eq!(config.project_dir, ".");
    assert_eq!(config.check_interval, 5000);
    assert_eq!(config.max_restarts, 3);
    assert!(config.auto_restart);
    assert!(!config.auto_start);
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let config_path = temp_dir.path().join("bad_port.json");
    fs::write(&config_path, r#"{"jupyter_port": 1023}"#).unwrap();
    let err = ConfigStore::open(&config_path).unwrap_err();
    assert!(err.is_configuration());

    let config_path = temp_dir.path().join("bad_interval.json");
    fs::write(&config_path, r#"{"check_interval": 10}"#).unwrap();
    assert!(ConfigStore::open(&config_path).is_err());

    let config_path = temp_dir.path().join("garbage.json");
    fs::write(&config_path, "not json at all").unwrap();
    assert!(ConfigStore::open(&config_path).is_err());
}

#[test]
fn test_update_persists_and_keeps_unknown_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("state").join("labkeeper.json");
    let store = ConfigStore::new(&config_path);

    let patch = json!({
        "port": 9100,
        "auto_restart": false,
        "ui_language": "en"
    });
    let updated = store.update(patch.as_object().unwrap()).unwrap();
    assert_eq!(updated.jupyter_port, 9100);
    assert!(!updated.auto_restart);

    // No temp file is left behind
    assert!(config_path.exists());
    assert!(!config_path.with_extension("tmp").exists());

    let reloaded = ConfigStore::open(&config_path).unwrap().current();
    assert_eq!(reloaded.jupyter_port, 9100);
    assert!(!reloaded.auto_restart);
    assert_eq!(reloaded.extra.get("ui_language"), Some(&json!("en")));
}

#[test]
fn test_rejected_update_leaves_store_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("labkeeper.json");
    let store = ConfigStore::new(&config_path);

    let patch = json!({"python_executable": "/nonexistent/bin/python"});
    assert!(store.update(patch.as_object().unwrap()).is_err());

    assert!(!config_path.exists());
    assert_eq!(store.current(), StoredConfig::default());
}

#[test]
fn test_merge_overrides_stored_values() {
    let temp_dir = TempDir::new().unwrap();
    let stored = StoredConfig {
        python_executable: "/bin/sh".to_string(),
        project_dir: temp_dir.path().to_string_lossy().into_owned(),
        ..StoredConfig::default()
    };

    let overrides = LaunchOverrides {
        port: Some(9200),
        mode: Some(Mode::Notebook),
        ..LaunchOverrides::default()
    };

    let launch = LaunchConfig::merge(&stored, &overrides).unwrap();
    assert_eq!(launch.port, 9200);
    assert_eq!(launch.mode, Mode::Notebook);
    assert_eq!(launch.url(), "http://localhost:9200/tree");
    assert_eq!(launch.working_dir, temp_dir.path());

    let launch = LaunchConfig::merge(&stored, &LaunchOverrides::default()).unwrap();
    assert_eq!(launch.url(), "http://localhost:8888/lab");
}
