//! Error types for httpwall

/// Result type alias using httpwall's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for httpwall operations
///
/// Everything here is raised while rules are being loaded. Evaluation of a
/// request never produces an `Error`; rules report trouble through their outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors not tied to a single rule
    #[error("configuration error: {0}")]
    Config(String),

    /// A rule definition that cannot be built
    #[error("invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    /// Two rules in one chain share an id
    #[error("duplicate rule id '{0}'")]
    DuplicateRule(String),

    /// More rules than the configured chain limit
    #[error("rule chain holds {actual} rules, limit is {limit}")]
    ChainTooLong { limit: usize, actual: usize },

    /// File system errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML rule file errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new error for a single rule definition
    pub fn invalid_rule(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Id of the rule this error belongs to, if any
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::InvalidRule { id, .. } | Self::DuplicateRule(id) => Some(id),
            _ => None,
        }
    }
}
