//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser diagnostic.
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings schema.
    #[error("settings do not match the schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Result alias for settings loading.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/tether.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("/etc/tether.json"));
        assert!(text.contains("denied"));
    }

    #[test]
    fn schema_errors_convert() {
        let json_err = serde_json::from_str::<u16>("\"port\"").unwrap_err();
        let err: SettingsError = json_err.into();
        assert!(matches!(err, SettingsError::Schema(_)));
    }
}
