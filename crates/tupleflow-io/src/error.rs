use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Mem(#[from] tupleflow_mem::Error),
}

impl From<tupleflow_core::Error> for Error {
    fn from(e: tupleflow_core::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<Error> for tupleflow_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Config(msg) => tupleflow_core::Error::Config(msg),
            Error::Mem(m) => m.into(),
        }
    }
}
