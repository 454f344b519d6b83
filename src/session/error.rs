use std::path::PathBuf;
use std::time::Duration;

/// Errors that can end a single dump attempt
///
/// These never escape the coordinator's trigger handlers; they are logged and
/// the trigger carries on.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// A registered state producer failed
    #[error("State producer #{index} failed: {source}")]
    Producer {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The record could not be encoded
    #[error("Failed to serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The storage collaborator failed to persist the record
    #[error("Failed to write session file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dump did not finish within the configured bound
    #[error("Dump timed out after {0:?}")]
    Timeout(Duration),
}

impl DumpError {
    pub fn producer(index: usize, error: anyhow::Error) -> Self {
        DumpError::Producer {
            index,
            source: error.into(),
        }
    }
}
