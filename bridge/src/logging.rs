//! Log output for hosts that cannot install a Rust subscriber themselves.
//!
//! The bridge only emits `tracing` events. Bridge faults go to the
//! `bridge::fault` target at `error` level so they can be told apart from
//! ordinary guest traps.

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "BRIDGE_LOG";

/// Filter used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_FILTER: &str = "bridge=info";

/// Installs a stderr subscriber filtered by `BRIDGE_LOG`. Returns false if a
/// global subscriber was already set (ours or the host's).
#[cfg(feature = "logging")]
pub fn init() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

#[cfg(not(feature = "logging"))]
pub fn init() -> bool {
    false
}

#[no_mangle]
pub extern "C" fn bridge_logging_init() -> bool {
    init()
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        let _ = init();
        assert!(!bridge_logging_init());
    }
}
