//! Log sink for the roof estimator: every record goes to a log file in the
//! output directory and to the console.

use anyhow::{Context, Result};
use log::{LevelFilter, Metadata, Record};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

struct TeeLogger {
    file: Mutex<File>,
}

impl log::Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        );
        println!("{line}");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Installs the global logger, appending to `log_path`.
pub fn init(log_path: &Path, level: LevelFilter) -> Result<()> {
    let file = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    log::set_boxed_logger(Box::new(TeeLogger {
        file: Mutex::new(file),
    }))
    .context("installing logger")?;
    log::set_max_level(level);
    Ok(())
}
