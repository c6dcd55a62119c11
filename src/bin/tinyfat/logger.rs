use core::fmt::Display;
use std::io::Write;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

struct StderrLogger {
    lock: Mutex<()>,
}

static LOGGER: StderrLogger = StderrLogger { lock: Mutex::new(()) };

impl Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _guard = self.lock.lock();
        let level = record.level();
        let tag: &dyn Display = match level {
            Level::Error => &level.bright_red(),
            Level::Warn => &level.bright_yellow(),
            Level::Info => &level.bright_blue(),
            Level::Debug => &level.bright_cyan(),
            Level::Trace => &level.bright_magenta(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{tag:5} {} {}",
            record.target().dimmed(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the logger. The level comes from `TINYFAT_LOG` (error, warn, info,
/// debug, trace), `warn` when unset or unparsable.
pub fn init() -> Result<(), log::SetLoggerError> {
    let level = std::env::var("TINYFAT_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}
