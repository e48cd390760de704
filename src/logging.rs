//! Log output setup
//!
//! Logs go to stderr so stdout only carries command results.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of `-v` flags
    pub verbosity: u8,
    /// Emit one JSON object per event
    pub json: bool,
}

impl LogOptions {
    /// Filter directive for the crate's own events
    pub fn directive(&self) -> String {
        let level = match self.verbosity {
            0 => DEFAULT_LEVEL,
            1 => "debug",
            _ => "trace",
        };
        format!("finfetch={},warn", level)
    }
}

/// Installs the global subscriber
///
/// `RUST_LOG` wins over `-v` when set.
pub fn init(options: LogOptions) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.directive()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if options.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_follows_verbosity() {
        assert_eq!(LogOptions::default().directive(), "finfetch=info,warn");
        assert_eq!(
            LogOptions {
                verbosity: 1,
                json: false
            }
            .directive(),
            "finfetch=debug,warn"
        );
        assert_eq!(
            LogOptions {
                verbosity: 5,
                json: true
            }
            .directive(),
            "finfetch=trace,warn"
        );
    }
}
