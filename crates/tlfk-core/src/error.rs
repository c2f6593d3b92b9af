use thiserror::Error;

pub type TlfkResult<T> = Result<T, TlfkError>;

#[derive(Debug, Error)]
pub enum TlfkError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
