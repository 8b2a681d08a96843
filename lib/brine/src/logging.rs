pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

/// Builds the default terminal logger. Components hold on to child loggers
/// created from this root.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Malformed logging config");

    config.build_logger().expect("Error building logger")
}
