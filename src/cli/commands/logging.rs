use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names in verbosity order; `-v` counts index into this list.
pub const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept a level name or its index, as `PORTICO_LOG_LEVEL=debug` or `=3`.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        let level = level.trim().to_ascii_lowercase();
        let index = match level.parse::<usize>() {
            Ok(index) if index < LEVELS.len() => Some(index),
            Ok(_) => None,
            Err(_) => LEVELS.iter().position(|name| *name == level),
        };
        index
            .and_then(|index| u8::try_from(index).ok())
            .ok_or_else(|| format!("invalid log level '{level}', expected one of {}", LEVELS.join(", ")))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("PORTICO_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
