use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use shelfwatch::config::MonitorConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SHELFWATCH_CONFIG",
        "SHELFWATCH_STORE_DIR",
        "SHELFWATCH_SOURCE_URL",
        "SHELFWATCH_API_ADDR",
        "SHELFWATCH_NOTIFY_HOST",
        "SHELFWATCH_NOTIFY_PORT",
        "SHELFWATCH_NOTIFY_ENABLED",
        "SHELFWATCH_PICKUP_RATIO",
        "SHELFWATCH_RETURN_RATIO",
        "SHELFWATCH_AUTOSAVE_SECS",
        "SHELFWATCH_LOG_FILE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "store_dir": "/var/lib/shelfwatch",
        "source": {
            "url": "replay:///srv/recordings/aisle3",
            "target_fps": 30,
            "flip_horizontal": true
        },
        "detector": {
            "pickup_ratio": 0.25,
            "pickup_threshold_mm": 40.0,
            "max_diff_mm": 400.0
        },
        "notify": {
            "host": "10.0.0.5",
            "port": 9000,
            "timeout_ms": 500
        },
        "persistence": {
            "autosave_secs": 60,
            "save_on_exit": false
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SHELFWATCH_CONFIG", file.path());
    std::env::set_var("SHELFWATCH_NOTIFY_PORT", "9100");
    std::env::set_var("SHELFWATCH_RETURN_RATIO", "0.6");
    std::env::set_var("SHELFWATCH_API_ADDR", "127.0.0.1:9901");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.store_dir, PathBuf::from("/var/lib/shelfwatch"));
    assert_eq!(cfg.source.url, "replay:///srv/recordings/aisle3");
    assert_eq!(cfg.source.target_fps, 30);
    assert!(cfg.source.flip_horizontal);
    assert_eq!(cfg.source.width, 320);
    assert_eq!(cfg.detector.pickup_ratio, 0.25);
    assert_eq!(cfg.detector.return_ratio, 0.6);
    assert_eq!(cfg.detector.pickup_threshold_mm, 40.0);
    assert_eq!(cfg.detector.return_threshold_mm, 20.0);
    assert_eq!(cfg.detector.max_diff_mm, Some(400.0));
    assert_eq!(cfg.notify.http.host, "10.0.0.5");
    assert_eq!(cfg.notify.http.port, 9100);
    assert_eq!(cfg.notify.http.timeout, Duration::from_millis(500));
    assert_eq!(cfg.api.addr, "127.0.0.1:9901");
    assert_eq!(cfg.autosave, Some(Duration::from_secs(60)));
    assert!(!cfg.save_on_exit);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
store_dir = "calibration"

[source]
url = "stub://bench"
depth_scale_mm = 0.5

[notify]
enabled = false

[api]
enabled = false

[logging]
file = "/var/log/shelfwatch/daemon.log"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = MonitorConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.store_dir, PathBuf::from("calibration"));
    assert_eq!(cfg.source.url, "stub://bench");
    assert_eq!(cfg.source.depth_scale_mm, 0.5);
    assert!(!cfg.notify.enabled);
    assert!(!cfg.api.enabled);
    assert!(cfg.save_on_exit);
    assert_eq!(
        cfg.log_file.as_deref(),
        Some(std::path::Path::new("/var/log/shelfwatch/daemon.log"))
    );

    std::env::set_var("SHELFWATCH_LOG_FILE", "");
    let cfg = MonitorConfig::load_from(Some(file.path())).expect("load config");
    assert!(cfg.log_file.is_none());

    clear_env();
}

#[test]
fn env_only_configuration() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHELFWATCH_STORE_DIR", "/tmp/zones");
    std::env::set_var("SHELFWATCH_NOTIFY_ENABLED", "no");
    std::env::set_var("SHELFWATCH_AUTOSAVE_SECS", "0");
    std::env::set_var("SHELFWATCH_LOG_FILE", "/tmp/shelfwatch.log");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/shelfwatch.log")));
    assert_eq!(cfg.store_dir, PathBuf::from("/tmp/zones"));
    assert!(!cfg.notify.enabled);
    assert!(cfg.autosave.is_none());
    assert_eq!(cfg.source.url, "stub://shelf");

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SHELFWATCH_PICKUP_RATIO", "lots");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("SHELFWATCH_RETURN_RATIO", "1.5");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("SHELFWATCH_NOTIFY_PORT", "70000");
    assert!(MonitorConfig::load().is_err());
    clear_env();
}

#[test]
fn unreadable_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    assert!(MonitorConfig::load_from(Some(file.path())).is_err());
    assert!(MonitorConfig::load_from(Some(std::path::Path::new("/nonexistent/shelf.json"))).is_err());

    clear_env();
}
