use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate migration id {id}: {name}")]
    Conflict { id: u64, name: String },

    #[error("migration {id} failed: {message}")]
    Execution { id: u64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ledger integrity violation: {0}")]
    Integrity(String),

    #[error("migration lock held: {0}")]
    Locked(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The migration identifier this error concerns, if it names one.
    pub fn migration_id(&self) -> Option<u64> {
        match self {
            Error::Conflict { id, .. } | Error::Execution { id, .. } => Some(*id),
            _ => None,
        }
    }
}
