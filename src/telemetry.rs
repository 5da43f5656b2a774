// ABOUTME: Tracing subscriber setup for processes embedding labexec.
// ABOUTME: RUST_LOG overrides the verbosity chosen by the caller.

use tracing_subscriber::EnvFilter;

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install a global fmt subscriber. Fails if one is already set.
pub fn try_init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(true)
        .try_init()
}

/// Like [`try_init`], ignoring an already installed subscriber.
pub fn init(verbose: bool) {
    let _ = try_init(verbose);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_wins_over_verbosity() {
        temp_env::with_var("RUST_LOG", Some("labexec=trace"), || {
            assert_eq!(filter(false).to_string(), "labexec=trace");
        });
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            assert_eq!(filter(true).to_string(), "debug");
            assert_eq!(filter(false).to_string(), "warn");
        });
    }
}
