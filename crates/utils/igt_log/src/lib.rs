//! Text logging for the registration crates.
//!
//! * `trace`: spammy things
//! * `debug`: things that might be useful when debugging
//! * `info`: things that we want to show to users (e.g. "registration applied")
//! * `warn`: problems that we can recover from
//! * `error`: problems that lead to loss of functionality or data
//!
//! The `warn_once` etc macros are for when you want to suppress repeated
//! logging of the exact same message, e.g. when a space stays unresolvable
//! for many consecutive updates.

mod result_extensions;
mod setup;

pub use log::{Level, LevelFilter, debug, error, info, log_enabled, trace, warn};

// The `*_once` macros live in `log_once`.
pub use log_once::{debug_once, error_once, info_once, trace_once, warn_once};

pub use result_extensions::ResultExt;
pub use setup::{default_log_filter, setup_logging};

/// Re-exports for the macros.
#[doc(hidden)]
pub mod external {
    pub use log;
    pub use log_once;
}
