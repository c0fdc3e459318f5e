//! Error taxonomy for the template engine.
//!
//! Missing or mistyped *data* never produces an error: it degrades to
//! [`Value::Null`](crate::Value::Null). Only malformed template syntax,
//! crossed resource limits, filter lookups and API misuse are raised.

use thiserror::Error;

/// Every failure the engine can surface to a render call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Malformed expression, tag, or unterminated block.
    #[error("syntax error at offset {position}: {message} (in `{expression}`)")]
    Syntax {
        message: String,
        position: usize,
        expression: String,
    },

    /// A configured bound was crossed.
    #[error("{limit} exceeded: {actual} > {max}")]
    LimitExceeded {
        limit: &'static str,
        actual: usize,
        max: usize,
    },

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("filter `{0}` used but no filter registry is configured")]
    FilterRegistryMissing(String),

    #[error("filter `{filter}` rejected its argument: {message}")]
    InvalidFilterArgument { filter: String, message: String },

    /// Programming-contract violation by the caller, not caused by template content.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TemplateError {
    pub(crate) fn syntax(
        message: impl Into<String>,
        position: usize,
        expression: impl Into<String>,
    ) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            position,
            expression: expression.into(),
        }
    }

    pub(crate) fn limit(limit: &'static str, actual: usize, max: usize) -> Self {
        TemplateError::LimitExceeded { limit, actual, max }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, TemplateError::Syntax { .. })
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, TemplateError::LimitExceeded { .. })
    }
}

impl From<serde_yaml::Error> for TemplateError {
    fn from(err: serde_yaml::Error) -> Self {
        TemplateError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_position_and_expression() {
        let err = TemplateError::syntax("missing `)`", 4, "(a + b");
        assert_eq!(
            err.to_string(),
            "syntax error at offset 4: missing `)` (in `(a + b`)"
        );
        assert!(err.is_syntax());
    }

    #[test]
    fn limit_message_names_the_bound() {
        let err = TemplateError::limit("max_path_length", 1001, 1000);
        assert_eq!(err.to_string(), "max_path_length exceeded: 1001 > 1000");
        assert!(err.is_limit_exceeded());
    }
}
