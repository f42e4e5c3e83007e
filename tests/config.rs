use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use lumasheet::{Config, ConfigError};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LUMASHEET__STORAGE__ROOT",
        "LUMASHEET__STORAGE__JPEG_QUALITY",
        "LUMASHEET__SUPERVISOR__STOP_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn toml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = Config::load(None).expect("load defaults");
    assert_eq!(cfg.storage.root, PathBuf::from("images"));
    assert_eq!(cfg.storage.jpeg_quality, 90);
    assert_eq!(cfg.capture.default_interval_secs, 1.0);
    assert_eq!(cfg.supervisor.stop_timeout(), Some(Duration::from_secs(30)));
    assert!(cfg.streams.is_empty());
}

#[test]
fn loads_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = toml_file(
        r#"
        [storage]
        root = "/var/lib/lumasheet"

        [supervisor]
        stop_timeout_secs = 0

        [[streams]]
        address = "rtsp://10.0.0.5/live/front"
        interval_secs = 0.5

        [[streams]]
        address = "synthetic://demo?frames=20"
        id = "demo"
        "#,
    );

    std::env::set_var("LUMASHEET__STORAGE__JPEG_QUALITY", "75");
    let cfg = Config::load(Some(file.path()));
    clear_env();
    let cfg = cfg.expect("load config");

    assert_eq!(cfg.storage.root, PathBuf::from("/var/lib/lumasheet"));
    assert_eq!(cfg.storage.jpeg_quality, 75);
    assert_eq!(cfg.supervisor.stop_timeout(), None);
    assert_eq!(cfg.streams.len(), 2);
    assert_eq!(cfg.streams[0].interval_secs, Some(0.5));
    assert!(cfg.streams[0].id.is_none());
    assert_eq!(cfg.streams[1].id.as_ref().map(|id| id.as_str()), Some("demo"));
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = toml_file(
        r#"
        [storage]
        jpeg_quality = 0
        "#,
    );
    assert!(matches!(
        Config::load(Some(file.path())),
        Err(ConfigError::Invalid(_))
    ));

    let file = toml_file(
        r#"
        [[streams]]
        address = "rtsp://cam"
        interval_secs = -2.0
        "#,
    );
    assert!(matches!(
        Config::load(Some(file.path())),
        Err(ConfigError::Invalid(_))
    ));

    let file = toml_file(
        r#"
        [[streams]]
        address = "rtsp://cam"
        id = "../escape"
        "#,
    );
    assert!(Config::load(Some(file.path())).is_err());
}
