use thiserror::Error;

/// Rejected operator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OperatorError {
    #[error("buffer count must be greater than zero")]
    ZeroCount,
    #[error("buffer skip must be greater than zero; fold the stream to collect every element instead")]
    ZeroSkip,
    #[error("buffer time span must be greater than zero")]
    ZeroTimeSpan,
    #[error("buffer time shift must be greater than zero; fold the stream to collect every element instead")]
    ZeroTimeShift,
}
