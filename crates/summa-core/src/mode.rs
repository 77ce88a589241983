use thiserror::Error;

/// Behavioral mode of a forward pass. Threaded explicitly through every
/// call so no shared mutable flag on the model is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

#[derive(Error, Debug)]
#[error("invalid model mode: {0}")]
pub struct InvalidModeError(pub String);

impl Mode {
    pub fn from_tag(tag: &str) -> Result<Self, InvalidModeError> {
        match tag {
            "train" => Ok(Mode::Train),
            "eval" => Ok(Mode::Eval),
            other => Err(InvalidModeError(other.to_string())),
        }
    }

    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_tags() {
        assert_eq!(Mode::from_tag("train").unwrap(), Mode::Train);
        assert_eq!(Mode::from_tag("eval").unwrap(), Mode::Eval);
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = Mode::from_tag("predict").unwrap_err();
        assert!(err.to_string().contains("predict"));
    }
}
