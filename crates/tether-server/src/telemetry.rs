//! Tracing subscriber setup.

use tether_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr. `RUST_LOG` overrides the
/// configured level. Returns `false` if a subscriber was already installed.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if settings.json {
        builder.json().try_init().is_ok()
    } else {
        builder.compact().try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        let settings = LoggingSettings::default();
        let _ = init_logging(&settings);
        assert!(!init_logging(&settings));
    }
}
