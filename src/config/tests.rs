use super::{ExecutorSettings, FanoutConfig};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_defaults() {
    let config = FanoutConfig::load().expect("Should load default config");
    let settings = config.executor_settings().unwrap();

    assert_eq!(settings.timeout_secs, 10.0);
    assert_eq!(settings.max_workers, 0);
    assert_eq!(settings.progress_every, 1);
}

#[test]
fn test_custom_config_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[executor]\ntimeout_secs = 2.5\nmax_workers = 3").unwrap();

    let path = file.path().to_str().unwrap();
    let config = FanoutConfig::load_with_custom_config(Some(path)).unwrap();
    let settings = config.executor_settings().unwrap();

    assert_eq!(settings.max_workers, 3);
    assert_eq!(settings.timeout(), Duration::from_millis(2500));
    // Untouched keys keep their embedded defaults
    assert_eq!(settings.progress_every, 1);
}

#[test]
fn test_custom_json_config_without_extension() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"executor": {{"progress_every": 7}}}}"#).unwrap();

    let path = file.path().to_str().unwrap();
    let config = FanoutConfig::load_with_custom_config(Some(path)).unwrap();
    let section = config.get_section("executor").unwrap();

    assert_eq!(section["progress_every"], 7);
    assert_eq!(section["max_workers"], 0);
}

#[test]
fn test_env_overrides_files() {
    // SAFETY: no other test reads or writes this variable
    unsafe {
        std::env::set_var("FANOUT_EXECUTOR__WORKER_CEILING", "12");
    }

    let config = FanoutConfig::load().unwrap();
    let settings = config.executor_settings().unwrap();

    unsafe {
        std::env::remove_var("FANOUT_EXECUTOR__WORKER_CEILING");
    }

    assert_eq!(settings.worker_ceiling, 12);
}

#[test]
fn test_full_config_contains_executor() {
    let config = FanoutConfig::load().unwrap();
    let full = config.get_full_config().unwrap();
    assert!(full.get("executor").is_some());
}

#[test]
fn test_invalid_timeout_collapses_to_zero() {
    let settings = ExecutorSettings {
        timeout_secs: -1.0,
        ..ExecutorSettings::default()
    };
    assert_eq!(settings.timeout(), Duration::ZERO);
}
