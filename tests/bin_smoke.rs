use picframe::{
    app::{App, AppConfig, LogLevel},
    cli::RunOptions,
    config::Config,
};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    sync::{Mutex, OnceLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn temp_home() -> PathBuf {
    let mut dir = env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_micros();
    dir.push(format!("picframe_test_home_{stamp}"));
    dir
}

fn with_temp_home<F: FnOnce(&Path)>(f: F) {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let original_home = env::var_os("HOME");
    let home = temp_home();
    fs::create_dir_all(&home).expect("failed to create temp HOME");
    env::set_var("HOME", &home);
    f(&home);
    if let Some(val) = original_home {
        env::set_var("HOME", val);
    } else {
        env::remove_var("HOME");
    }
    let _ = fs::remove_dir_all(home);
}

fn write_config(home: &Path, contents: &str) {
    let cfg_dir = home.join(".picframe");
    fs::create_dir_all(&cfg_dir).expect("failed to create config dir");
    fs::write(cfg_dir.join("config.toml"), contents).expect("failed to write config");
}

fn quiet_options(home: &Path) -> RunOptions {
    RunOptions {
        log_file: Some(home.join("picframe.log")),
        ..RunOptions::default()
    }
}

#[test]
fn first_run_writes_default_config() {
    with_temp_home(|home| {
        let app = App::from_options(quiet_options(home)).expect("default config should load");
        let written = home.join(".picframe").join("config.toml");
        assert!(written.exists(), "config was not created at {}", written.display());
        let reloaded = Config::load_from_path(&written).unwrap();
        assert_eq!(reloaded, Config::default());
        assert_eq!(app.config().refresh_minute, 1);
    });
}

#[test]
fn cli_overrides_file_which_overrides_defaults() {
    with_temp_home(|home| {
        write_config(
            home,
            r#"
internal_base_url = "http://10.0.0.5:3000"
refresh_minute = 5
viewer_program = "fim"
        "#,
        );
        let cfg = Config::load_or_default().expect("config load failed");
        let merged = AppConfig::from_sources(cfg.clone(), RunOptions::default()).unwrap();
        assert_eq!(merged.refresh_minute, 5);
        assert_eq!(merged.display.viewer_program, "fim");
        assert_eq!(merged.probe.ping_host, "8.8.8.8");

        let opts = RunOptions {
            base_url: Some("http://10.0.0.9:3000".into()),
            refresh_minute: Some(10),
            ..RunOptions::default()
        };
        let merged = AppConfig::from_sources(cfg, opts).unwrap();
        assert_eq!(merged.refresh_minute, 10);
        assert_eq!(merged.probe.internal_base_url.to_string(), "http://10.0.0.9:3000");
        assert_eq!(merged.display.viewer_program, "fim");
    });
}

#[test]
fn invalid_config_file_is_a_startup_error() {
    with_temp_home(|home| {
        write_config(home, "refresh_minute = 61\n");
        let err = App::from_options(quiet_options(home))
            .err()
            .expect("expected invalid minute to be rejected");
        let msg = format!("{err}");
        assert!(msg.contains("config.toml"), "{msg}");
        assert!(msg.contains("refresh_minute"), "{msg}");
    });
}

#[test]
fn env_log_level_overrides_config() {
    with_temp_home(|home| {
        write_config(home, "log_level = \"warn\"\n");
        let original = env::var_os("PICFRAME_LOG_LEVEL");
        env::set_var("PICFRAME_LOG_LEVEL", "trace");
        let app = App::from_options(quiet_options(home));
        if let Some(val) = original {
            env::set_var("PICFRAME_LOG_LEVEL", val);
        } else {
            env::remove_var("PICFRAME_LOG_LEVEL");
        }
        let app = app.expect("config should load");
        assert_eq!(app.config().log_level, LogLevel::Warn);
        assert_eq!(app.logger().level(), LogLevel::Trace);
    });
}

#[test]
fn binary_prints_next_wake() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "log_file = \"{}\"\nrefresh_minute = 30\n",
            dir.path().join("picframe.log").display()
        ),
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_picframe"))
        .arg("--config")
        .arg(&config)
        .arg("next-wake")
        .env("HOME", dir.path())
        .env_remove("PICFRAME_LOG_PATH")
        .output()
        .expect("failed to run picframe");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let wait = humantime::parse_duration(stdout.trim()).expect("humantime duration on stdout");
    assert!(wait <= Duration::from_secs(3_600), "{stdout}");
}

#[test]
fn binary_exits_one_on_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_picframe"))
        .args(["--refresh-minute", "99", "next-wake"])
        .env("HOME", dir.path())
        .output()
        .expect("failed to run picframe");
    assert_eq!(output.status.code(), Some(1));

    let config = dir.path().join("bad.toml");
    fs::write(&config, "internal_base_url = \"ftp://frames\"\n").unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_picframe"))
        .arg("--config")
        .arg(&config)
        .arg("next-wake")
        .env("HOME", dir.path())
        .output()
        .expect("failed to run picframe");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: config error"), "{stderr}");
}

#[test]
fn help_lists_core_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_picframe"))
        .arg("--help")
        .output()
        .expect("failed to run picframe");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--base-url", "--image-dir", "--refresh-minute", "--skip-probe", "next-wake"] {
        assert!(help.contains(flag), "help output missing {flag}: {help}");
    }
}
