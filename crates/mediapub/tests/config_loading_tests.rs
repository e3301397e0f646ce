//! Loading a config file and wiring a controller from it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::NamedTempFile;

use mediapub::config::load_config;
use mediapub::publisher::{PublisherRegistry, STORYMAKER};
use mediapub::{ControllerConfig, Database, EncryptionError, EncryptionService};

const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_drives_registry_and_controller_settings() {
    let file = write_config(
        r#"{
            "version": "1.0",
            "executors": { "poll_interval_ms": 75 },
            "retry": { "max_attempts": 4, "backoff_base_ms": 100, "backoff_max_ms": 400 },
            "publishers": { "storymaker": { "render_spec": "mp4_1080p" } }
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    let registry = PublisherRegistry::from_config(&config);
    assert!(registry.contains(STORYMAKER));

    let controller_config = ControllerConfig::from(&config);
    assert_eq!(controller_config.poll_interval, Duration::from_millis(75));
    assert_eq!(config.retry.max_attempts, 4);
}

#[test]
fn test_database_path_from_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("mediapub.db");
    let file = write_config(&format!(
        r#"{{ "version": "1.0", "database_path": {} }}"#,
        serde_json::to_string(&db_path.display().to_string()).unwrap()
    ));

    let config = load_config(file.path()).unwrap();
    let path = config.database_path().unwrap();
    assert_eq!(path, db_path);

    let _db = Arc::new(Database::open(&path).unwrap());
    assert!(path.exists());
}

#[test]
#[serial]
fn test_encryption_key_from_configured_env_var() {
    let file = write_config(
        r#"{ "version": "1.0", "encryption": { "key_env_var": "MEDIAPUB_IT_KEY", "encrypt_at_rest": true } }"#,
    );
    let config = load_config(file.path()).unwrap();

    std::env::remove_var("MEDIAPUB_IT_KEY");
    assert!(matches!(
        EncryptionService::from_config(&config.encryption),
        Err(EncryptionError::KeyNotSet { .. })
    ));

    std::env::set_var("MEDIAPUB_IT_KEY", TEST_KEY);
    assert!(EncryptionService::from_config(&config.encryption).is_ok());
    std::env::remove_var("MEDIAPUB_IT_KEY");
}
