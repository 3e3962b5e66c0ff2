//! Verbosity mapping between the CLI's signed log level and the av
//! library's own level system.

use ffmpeg_next as ffmpeg;

/// Translate the signed CLI verbosity (-3..=9, lower is more severe) into
/// an av log level.
pub fn av_level_for(verbosity: i32) -> ffmpeg::util::log::Level {
    use ffmpeg::util::log::Level;
    match verbosity {
        i32::MIN..=-3 => Level::Fatal,
        -2 => Level::Error,
        -1 => Level::Warning,
        0 => Level::Info,
        1 => Level::Verbose,
        2 => Level::Debug,
        _ => Level::Trace,
    }
}

/// Initialize the av library and set its log level from the CLI verbosity.
///
/// Safe to call more than once; initialization is idempotent.
pub fn set_av_log_level(verbosity: i32) {
    if let Err(e) = ffmpeg::init() {
        tracing::warn!(error = %e, "av library initialization failed");
        return;
    }
    let level = av_level_for(verbosity);
    ffmpeg::util::log::set_level(level);
    tracing::debug!(verbosity, av_level = ?level, "set av log level");
}
