//! Error types.
//!
//! Only two of the error kinds in the taxonomy (configuration, store-open)
//! are ever returned as `Result::Err` from the library surface; everything
//! else is a logged-and-continue path, by design
//! (a stray message or a failed write must not kill the recorder or the
//! k-machine engine).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurtlesError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to open store at {path}: {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TurtlesError>;
