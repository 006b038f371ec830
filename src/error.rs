/// Errors surfaced by the fallible edges of the crate: reading configuration,
/// ability data, and event files.
///
/// The tracker itself never returns these. Disagreements between the log and
/// the cooldown model are recorded as `Diagnostic`s instead (see `tracker.rs`).
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("could not read {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ability data in {origin}: {source}")]
    AbilityData {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("unknown spec profile: {0}")]
    UnknownSpec(String),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let err = LedgerError::io(
            "/tmp/missing.toml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.toml"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn unknown_spec_display() {
        let err = LedgerError::UnknownSpec("MAGE/Fire".into());
        assert_eq!(err.to_string(), "unknown spec profile: MAGE/Fire");
    }
}
