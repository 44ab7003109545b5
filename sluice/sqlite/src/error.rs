/// Errors opening a SQLite store
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SqliteError>;
