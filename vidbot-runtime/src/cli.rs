//! Fixed command-line surface of a vidbot binary.

use std::ffi::OsString;

use clap::Parser;

/// Arguments accepted by `BotRuntime::run`.
#[derive(Debug, Parser)]
#[command(name = "vidbot")]
pub struct RunArgs {
    /// Source URL or file path.
    #[arg(long)]
    pub input: String,

    /// Force a specific input demuxer by name.
    #[arg(long)]
    pub input_format: Option<String>,

    /// Log verbosity, -3 (fatal only) through 9 (trace).
    #[arg(
        long,
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-3..=9)
    )]
    pub loglevel: i32,

    /// Bot instance identifier, reported in the initialization control
    /// message.
    #[arg(long)]
    pub id: Option<String>,
}

/// Parse the CLI surface from an explicit argument iterator.
pub fn parse_args<I, T>(args: I) -> Result<RunArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    RunArgs::try_parse_from(args)
}

/// Default tracing filter directive for a CLI verbosity.
pub fn tracing_filter(verbosity: i32) -> &'static str {
    match verbosity {
        i32::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 | 2 => "debug",
        _ => "trace",
    }
}
