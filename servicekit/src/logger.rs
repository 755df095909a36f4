use crate::config::LoggingConfig;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::fs::OpenOptions;

/// Maps a configured level name to a filter, defaulting to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info, // Default to Info for any other value
    }
}

fn dispatch(level: LevelFilter, colored: bool) -> fern::Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::BrightBlack)
        .debug(Color::BrightBlue)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            if colored {
                out.finish(format_args!(
                    "[{} {} {}] {}",
                    timestamp,
                    colors.color(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{} {} {}] {}",
                    timestamp,
                    record.level(),
                    record.target(),
                    message
                ))
            }
        })
        .level(level)
}

/// Installs the global logger.
///
/// Logs go to the configured file in append mode, or to stderr when no file
/// is set or it cannot be opened. Fails if a logger is already installed.
pub fn setup_logger(config: &LoggingConfig) -> Result<(), log::SetLoggerError> {
    let level = parse_level(config.level());

    match config.file() {
        Some(file_path) => match OpenOptions::new().create(true).append(true).open(file_path) {
            Ok(file) => {
                dispatch(level, false).chain(file).apply()?;
                eprintln!("Logging to file: {file_path}");
            }
            Err(e) => {
                eprintln!("Warning: Failed to open log file '{file_path}': {e}");
                eprintln!("Continuing with logging to stderr.");
                dispatch(level, true).chain(std::io::stderr()).apply()?;
            }
        },
        None => {
            dispatch(level, true).chain(std::io::stderr()).apply()?;
        }
    }

    log::info!("Logger initialized with level: {}", config.level());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::limits::LOG_LEVELS;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), LevelFilter::Trace);
        assert_eq!(parse_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_level("warn"), LevelFilter::Warn);
        assert_eq!(parse_level("error"), LevelFilter::Error);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("info"), LevelFilter::Info);
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
    }

    #[test]
    fn test_every_accepted_level_has_its_own_filter() {
        for level in LOG_LEVELS {
            assert_eq!(parse_level(level).as_str().to_lowercase(), level);
        }
    }

    #[test]
    fn test_file_logger_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let config = LoggingConfig::new("debug", Some(path.display().to_string()));
        setup_logger(&config).unwrap();
        log::warn!(target: "servicekit::tests", "written to file");
        log::logger().flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("existing line\n"));
        assert!(contents.contains("Logger initialized with level: debug"));
        assert!(contents.contains("servicekit::tests] written to file"));
    }
}
