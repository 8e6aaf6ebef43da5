use std::path::PathBuf;

use peerstash_core::FileId;

/// Reasons a control-plane operation is refused before it starts.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("replication degree must be at least 1")]
    InvalidDegree,
    #[error("{} was never backed up and is not readable locally", .0.display())]
    UnknownFile(PathBuf),
    #[error("restore of {0} is already in progress")]
    RestoreInProgress(FileId),
}
