use thiserror::Error;

/// Errors surfaced by the library. Configuration mistakes are caught in the
/// binary before any transport traffic; everything here is fatal to the rank
/// that hits it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed image: {0}")]
    Parse(String),

    #[error("bad parameter: {0}")]
    Config(String),

    #[error("bad topology: {0}")]
    Topology(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
