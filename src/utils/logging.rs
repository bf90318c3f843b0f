//! Logging configuration for the nowcasting system.

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{info, Level};
use std::io::Write;

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m", // Red
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Info => "\x1b[32m",  // Green
        Level::Debug => "\x1b[36m", // Cyan
        Level::Trace => "\x1b[35m", // Magenta
    }
}

/// Initialize the logging system.
///
/// `NOWCAST_LOG` overrides `level`, `NOWCAST_LOG_STYLE` controls coloring.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(level: &str) {
    let env = Env::default()
        .filter_or("NOWCAST_LOG", level)
        .write_style_or("NOWCAST_LOG_STYLE", "auto");

    Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}{:5}\x1b[0m {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level_color(record.level()),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Stdout)
        .try_init()
        .ok();

    info!("Logging initialized at level: {}", level);
}

/// Initialize test logging (for use in tests)
#[cfg(test)]
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
