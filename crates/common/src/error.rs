//! Configuration error types shared across the workspace

use thiserror::Error;

/// Common error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_key_and_value() {
        let err = Error::InvalidValue {
            key: "IDENTITY_ENVIRONMENT".into(),
            value: "staging".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"staging\" for IDENTITY_ENVIRONMENT"
        );
    }

    #[test]
    fn io_error_converts_with_prefix() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }
}
