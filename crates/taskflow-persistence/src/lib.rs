mod backup;
mod codec;
mod store;

pub use backup::BackupArchive;
pub use codec::{decode_record, encode_record};
pub use store::{DurableStore, StoreConfig};

use std::path::PathBuf;
use taskflow_core::TaskId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Task record not found: {0}")]
    NotFound(TaskId),

    #[error("Corrupt record {}: {reason}", .path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("Storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Storage {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::CorruptRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
