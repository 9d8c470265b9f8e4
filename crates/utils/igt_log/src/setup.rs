//! Function to setup logging in binaries and tests.

/// Crates that are too noisy on `debug` to be useful by default.
const LOUD_CRATES: [&str; 1] = [
    // Prints a line per scope registration when profiling is on:
    "puffin",
];

/// Determines the default log filter.
///
/// Uses `RUST_LOG` if set, otherwise `info`, and then turns down [`LOUD_CRATES`].
pub fn default_log_filter() -> String {
    let mut rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned());

    for loud_crate in LOUD_CRATES {
        if !rust_log.contains(&format!("{loud_crate}=")) {
            rust_log += &format!(",{loud_crate}=warn");
        }
    }

    rust_log
}

/// Sets up logging to stderr.
///
/// Safe to call more than once, e.g. from every test. Only the first call has an effect.
pub fn setup_logging() {
    static LOG_INIT: parking_lot::Once = parking_lot::Once::new();

    LOG_INIT.call_once(|| {
        let filter = default_log_filter();

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&filter);
        builder.format_timestamp_millis();

        if cfg!(test) {
            builder.is_test(true);
        }

        if let Err(err) = builder.try_init() {
            // Someone else installed a logger first; we still get their output.
            eprintln!("Failed to set up logging: {err}");
        }
    });
}
