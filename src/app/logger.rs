use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Stdout + append-only file logger.
///
/// Lines look like `2024-11-14 22:13:20 - File sunset.jpg downloaded successfully.`;
/// warnings and errors carry a `WARN:`/`ERROR:` tag after the dash.
pub struct Logger {
    level: LogLevel,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl Logger {
    pub fn new(level: LogLevel, file_path: Option<PathBuf>) -> Self {
        let env_level = std::env::var("PICFRAME_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::from_str(&s).ok());
        let effective_level = env_level.unwrap_or(level);

        let env_file = std::env::var_os("PICFRAME_LOG_PATH").map(PathBuf::from);
        let path = env_file.or(file_path);
        let file = path.as_deref().and_then(|p| match open_append(p) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!(
                    "{} - WARN: cannot open log file {}: {err}; logging to stdout only",
                    Local::now().format(TIMESTAMP_FORMAT),
                    p.display()
                );
                None
            }
        });
        Self {
            level: effective_level,
            path: file.as_ref().and(path),
            file,
        }
    }

    /// Logger without a file sink.
    pub fn stdout_only(level: LogLevel) -> Self {
        Self {
            level,
            file: None,
            path: None,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        if level > self.level {
            return;
        }
        let ts = Local::now().format(TIMESTAMP_FORMAT);
        let line = match level {
            LogLevel::Error => format!("{ts} - ERROR: {}", msg.as_ref()),
            LogLevel::Warn => format!("{ts} - WARN: {}", msg.as_ref()),
            _ => format!("{ts} - {}", msg.as_ref()),
        };
        println!("{line}");
        if let Some(mut file) = self.file.as_ref() {
            let _ = writeln!(file, "{line}");
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Error, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Warn, msg);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn trace(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Trace, msg);
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
