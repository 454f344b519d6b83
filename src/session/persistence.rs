use crate::env;
use crate::session::error::DumpError;
use crate::session::metadata::SessionRecord;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Byte-level storage primitive used by the gateway
#[async_trait]
pub trait Storage: Send + Sync {
    /// Durably replace the contents of `path` with `bytes`
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Read the full contents of `path`
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Local filesystem storage with write-then-rename replacement
#[derive(Debug, Clone, Default)]
pub struct FileStorage;

impl FileStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            async_fs::create_dir_all(parent).await?;
        }

        let temp_file = env::temp_file_path(path);

        let result: io::Result<()> = async {
            let mut file = async_fs::File::create(&temp_file).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            async_fs::rename(&temp_file, path).await
        }
        .await;

        if result.is_err() {
            let _ = async_fs::remove_file(&temp_file).await;
        }
        result
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        async_fs::read(path).await
    }
}

/// Result of a successful write
#[derive(Debug, Clone)]
pub struct PersistenceResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Writes and reads the single session record at a configured path
pub struct PersistenceGateway {
    path: PathBuf,
    storage: Arc<dyn Storage>,
    io_lock: Mutex<()>,
}

impl PersistenceGateway {
    pub fn new(path: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            path: path.into(),
            storage,
            io_lock: Mutex::new(()),
        }
    }

    /// Gateway backed by the local filesystem
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Arc::new(FileStorage::new()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `record` as pretty JSON and replace the session file
    pub async fn write(&self, record: &SessionRecord) -> Result<PersistenceResult, DumpError> {
        let start_time = Instant::now();
        let serialized = serde_json::to_vec_pretty(record)?;

        let _guard = self.io_lock.lock().await;
        self.storage
            .write(&self.path, &serialized)
            .await
            .map_err(|source| DumpError::Write {
                path: self.path.clone(),
                source,
            })?;

        let result = PersistenceResult {
            path: self.path.clone(),
            bytes_written: serialized.len() as u64,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };
        debug!(
            "Session record written to {}: {} bytes in {}ms",
            result.path.display(),
            result.bytes_written,
            result.duration_ms
        );
        Ok(result)
    }

    /// Load the record at the configured path
    pub async fn read(&self) -> Option<SessionRecord> {
        self.read_path(&self.path).await
    }

    /// Load the record at `path`
    ///
    /// Missing, unreadable and malformed files all come back as `None`.
    pub async fn read_path(&self, path: &Path) -> Option<SessionRecord> {
        let content = {
            let _guard = self.io_lock.lock().await;
            self.storage.read(path).await
        };

        let content = match content {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No prior session at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read session file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<SessionRecord>(&content) {
            Ok(record) => {
                info!(
                    "Loaded session record from {} (reason: {}, at: {})",
                    path.display(),
                    record.reason(),
                    record.meta().at
                );
                Some(record)
            }
            Err(e) => {
                warn!("Ignoring malformed session file {}: {}", path.display(), e);
                None
            }
        }
    }
}
