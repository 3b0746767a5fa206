use thiserror::Error;

/// Storage errors for the segment directory and its side table.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to create directory: {0}")]
    Directory(String),

    #[error("Invalid segment name: {0}")]
    InvalidName(String),

    #[error("Failed to delete {name}: {reason}")]
    DeleteFailed { name: String, reason: String },
}

impl StorageError {
    pub fn directory(msg: impl Into<String>) -> Self {
        StorageError::Directory(msg.into())
    }

    pub fn delete_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::DeleteFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
