use thiserror::Error;

/// Errors raised while compiling style objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
    /// A token reference did not match any registered token.
    ///
    /// Value resolution treats this as non-fatal and keeps the literal text.
    #[error("unknown token ${scale}${token}")]
    UnknownToken { scale: String, token: String },

    /// A variant selection named a value its group never declared.
    #[error("unknown value '{value}' for variant '{group}'")]
    UnknownVariantValue { group: String, value: String },

    /// The style object does not follow the accepted grammar.
    #[error("invalid style value at '{path}': {reason}")]
    InvalidStyleValue { path: String, reason: String },

    /// Utility expansion nested past the recursion guard.
    #[error("utility '{name}' expanded past depth {depth}; utilities probably reference each other")]
    UtilityCycle { name: String, depth: usize },
}

impl StyleError {
    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StyleError::InvalidStyleValue {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StyleError;

    #[test]
    fn formats_error_messages() {
        let err = StyleError::UnknownToken {
            scale: "colors".to_string(),
            token: "brand".to_string(),
        };
        assert_eq!(err.to_string(), "unknown token $colors$brand");

        let err = StyleError::UnknownVariantValue {
            group: "size".to_string(),
            value: "huge".to_string(),
        };
        assert_eq!(err.to_string(), "unknown value 'huge' for variant 'size'");

        let err = StyleError::invalid("button.color", "booleans are not CSS values");
        assert_eq!(
            err.to_string(),
            "invalid style value at 'button.color': booleans are not CSS values"
        );
    }
}
