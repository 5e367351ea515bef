use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("No file system image currently open")]
    NoImageOpen,

    #[error("{0}")]
    InvalidUsage(String),

    #[error("{0}")]
    Fs(#[from] storage::FsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;
