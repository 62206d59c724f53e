pub type SplineResult<T> = Result<T, SplineError>;

#[derive(thiserror::Error, Debug)]
pub enum SplineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SplineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            SplineError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            SplineError::evaluation("x")
                .to_string()
                .contains("evaluation error:")
        );
        assert!(SplineError::codec("x").to_string().contains("codec error:"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = SplineError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
