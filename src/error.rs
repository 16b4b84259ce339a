use thiserror::Error;

// Unified error type for blocklss

#[derive(Error, Debug)]
pub enum LssError {
    #[error("setup error: {0}")]
    Setup(String),
    #[error("global id {gid} requested by rank {requester} is not owned by rank {rank}")]
    ValueNotFound { gid: u64, requester: usize, rank: usize },
    #[error("unsupported operation: {0}")]
    NotSupported(String),
    #[error("communication pattern is frozen")]
    Frozen,
    #[error("communication pattern not ready: {0}")]
    NotReady(&'static str),
    #[error("no stored entry at block ({row}, {col})")]
    EntryNotFound { row: usize, col: usize },
    #[error("parallel error: {0}")]
    Parallel(String),
    #[error("solve error: {0}")]
    Solve(String),
    #[error("factorization error: {0}")]
    Factor(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LssError>;
