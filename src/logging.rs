//! Console + log file sink shared by the controller and the worker.
//!
//! Every line goes to stderr. When opened with a directory, the same line is
//! appended (with a wall-clock timestamp) to `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.log`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type LogFile = Arc<Mutex<BufWriter<File>>>;

#[derive(Clone, Default)]
pub struct Logger {
    file: Option<LogFile>,
}

impl Logger {
    /// stderr only (tests, or when the log directory is unusable)
    pub fn stderr_only() -> Self {
        Self { file: None }
    }

    pub fn open(dir: &Path, prefix: &str) -> Result<(Self, PathBuf)> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.log", prefix, ts));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        eprintln!("Log: {}", path.display());
        Ok((
            Self {
                file: Some(Arc::new(Mutex::new(BufWriter::new(file)))),
            },
            path,
        ))
    }

    /// Falls back to stderr when the log file cannot be created.
    pub fn open_or_stderr(dir: &Path, prefix: &str) -> Self {
        match Self::open(dir, prefix) {
            Ok((logger, _)) => logger,
            Err(e) => {
                eprintln!("[log] {e:#}; logging to stderr only");
                Self::stderr_only()
            }
        }
    }

    pub fn write(&self, msg: &str) {
        eprintln!("{}", msg);
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let ts = chrono::Local::now().format("%H:%M:%S%.3f");
                let _ = writeln!(f, "{} {}", ts, msg);
                let _ = f.flush();
            }
        }
    }
}

#[macro_export]
macro_rules! log {
    ($logger:expr, $($arg:tt)*) => {{
        $logger.write(&format!($($arg)*));
    }};
}
