use thiserror::Error;

/// General-purpose error for engine runs whose inputs and reactions do not
/// bring an error type of their own.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("effect failed: {0}")]
    Effect(String),
    #[error("input stream failed: {0}")]
    Input(String),
    #[error("reaction failed: {0}")]
    Reaction(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CycleError {
    pub fn effect(message: impl Into<String>) -> Self {
        Self::Effect(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn reaction(message: impl Into<String>) -> Self {
        Self::Reaction(message.into())
    }
}
