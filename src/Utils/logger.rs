//! Logger setup for binaries and long runs. Library code only talks to the `log` facade.
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;

/// Maps the loglevel strings used in task files ("info", "debug", "warn", "error", "off")
/// to a filter. Unknown strings fall back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" | "none" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialise terminal logging and, when `log_file` is given, duplicate the output into that file.
/// Calling it twice is harmless: the second call returns an error that is only reported.
pub fn init_logger(level: LevelFilter, log_file: Option<&str>) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(level, Config::default(), file)),
            Err(e) => eprintln!("Failed to create log file '{}': {}", path, e),
        }
    }
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("logger already initialised: {}", e);
    }
}
