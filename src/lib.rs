// Application installer
// Library entry point

pub mod api;
pub mod database;
pub mod error;
pub mod installation;
pub mod jobs;
pub mod models;
pub mod security;
pub mod settings;
pub mod utils;

pub use api::installer::{Installer, ProgressEmitter};
pub use error::{InstallerError, Result};
pub use settings::InstallerSettings;

use anyhow::Context;
use std::path::Path;

fn text_line(timestamp: &str, message: &std::fmt::Arguments, record: &log::Record) -> String {
    let raw = message.to_string();
    let (phase, step, cleaned) = utils::logging::parse_log_metadata(&raw);
    utils::logging::format_human_readable_log(
        timestamp,
        record.level(),
        record.target(),
        &cleaned,
        phase.as_deref(),
        step.as_deref(),
    )
}

fn json_line(message: &std::fmt::Arguments, record: &log::Record) -> String {
    let raw = message.to_string();
    let (phase, step, cleaned) = utils::logging::parse_log_metadata(&raw);
    utils::logging::format_json_log(
        &chrono::Utc::now().to_rfc3339(),
        record.level(),
        record.target(),
        &cleaned,
        phase.as_deref(),
        step.as_deref(),
    )
}

/// Send logs to `<log_dir>/installer-<ts>.log` (JSON lines) and `.txt` (human readable).
///
/// Console output goes to stderr at `console_level`; stdout is left to command results.
pub fn init_logging(
    log_dir: &Path,
    with_console: bool,
    console_level: log::LevelFilter,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let json_path = log_dir.join(format!("installer-{}.log", stamp));
    let text_path = log_dir.join(format!("installer-{}.txt", stamp));

    let json_file = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", json_line(message, record))))
        .chain(fern::log_file(&json_path)?);

    let text_file = fern::Dispatch::new()
        .format(|out, message, record| {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
            out.finish(format_args!("{}", text_line(&ts, message, record)))
        })
        .chain(fern::log_file(&text_path)?);

    // Files always get everything down to debug.
    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("sqlx", log::LevelFilter::Warn)
        .chain(json_file)
        .chain(text_file);

    if with_console {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(console_level)
                .format(|out, message, record| {
                    let ts = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
                    out.finish(format_args!("{}", text_line(&ts, message, record)))
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch.apply()?;
    log::info!(
        "[PHASE: initialization] [STEP: logging] Writing logs to {:?}",
        log_dir
    );
    Ok(())
}
