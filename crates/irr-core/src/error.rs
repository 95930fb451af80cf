//! Error types for irr-core

use thiserror::Error;

/// Errors raised while turning object text into a [`crate::Record`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The first attribute does not name a known object class
    #[error("Unknown object class: {0}")]
    UnknownClass(String),

    /// The text is not structurally an RPSL object
    #[error("Malformed object: {0}")]
    Malformed(String),

    /// A required attribute is absent
    #[error("Mandatory attribute {attribute} missing in {class} object")]
    MissingAttribute { class: String, attribute: String },

    /// An attribute carries a value that cannot be interpreted
    #[error("Invalid value {value:?} for attribute {attribute}: {reason}")]
    InvalidValue {
        attribute: String,
        value: String,
        reason: String,
    },
}

impl ParseError {
    /// Create a new Malformed error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Create a new InvalidValue error
    pub fn invalid(
        attribute: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            attribute: attribute.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// True when the object was rejected only because its class is unknown
    pub fn is_unknown_class(&self) -> bool {
        matches!(self, Self::UnknownClass(_))
    }
}

/// Errors raised while loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// General core errors
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::invalid("origin", "ASX", "not a number");
        let text = err.to_string();
        assert!(text.contains("origin"));
        assert!(text.contains("ASX"));
    }

    #[test]
    fn test_unknown_class_flag() {
        assert!(ParseError::UnknownClass("foo".into()).is_unknown_class());
        assert!(!ParseError::malformed("bad").is_unknown_class());
    }
}
