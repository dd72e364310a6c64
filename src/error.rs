use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("system call failed: {0}")]
    Unix(#[from] nix::Error),
    /// The peer hung up while a partial sensor frame was still buffered.
    #[error("connection was closed mid frame")]
    TruncatedFrame,
    #[error("fatal runtime failure: {0}")]
    Fatal(String),
}
