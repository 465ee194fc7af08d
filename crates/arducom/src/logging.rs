use tracing::level_filters::LevelFilter;

/// Map `-v` occurrences to a stderr log level and install the
/// subscriber. Quiet by default; `-v` shows the frame-level debug dumps,
/// `-vv` everything.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
