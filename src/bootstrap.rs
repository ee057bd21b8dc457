//! Process bootstrap: environment cleanup and logging setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Remove `TZ` when it starts with `:` (a path form some hosts export that
/// the time libraries do not understand).
///
/// Must run before the runtime spawns any thread.
pub fn unset_colon_tz() {
    if std::env::var("TZ").is_ok_and(|tz| tz.starts_with(':')) {
        // SAFETY: called at the top of main, while the process is still
        // single-threaded.
        unsafe {
            std::env::remove_var("TZ");
        }
    }
}

/// Default log filter; `RUST_LOG` takes precedence.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug,chartd=debug"
    } else {
        "info,chartd=info"
    }
}

/// Install the global tracing subscriber. Logs go to stderr because stdout
/// carries the wire protocol.
pub fn init_tracing(debug: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
