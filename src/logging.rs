use crate::config::CONFIG;

/// Initialize the global tracing subscriber from the configured log level.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(CONFIG.log_level.clone())
        .try_init();
}
