/// Initializes structured logging for the binary.
///
/// Verbosity is controlled through `RUST_LOG` (for example
/// `RUST_LOG=gasflow=debug`) and defaults to `warn`. Logs go to stderr so
/// they never mix with command output on stdout.
pub fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
