//! Where produced audio and timing documents are written.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// File manager the pipeline writes through.
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Write `bytes` as `filename` inside the output directory.
    ///
    /// Directory components in `filename` are ignored.
    async fn save(&self, bytes: &[u8], filename: &str) -> io::Result<PathBuf>;

    /// Write a scratch file with a unique name ending in `suffix`.
    async fn temp_save(&self, bytes: &[u8], suffix: &str) -> io::Result<PathBuf>;

    /// Delete a file previously written by this store.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    fn output_dir(&self) -> &Path;
}

/// Store backed by a local directory.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open `dir`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub async fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn resolve(&self, filename: &str) -> io::Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid output file name: {:?}", filename)))?;
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl OutputStore for LocalStore {
    async fn save(&self, bytes: &[u8], filename: &str) -> io::Result<PathBuf> {
        let path = self.resolve(filename)?;
        tokio::fs::write(&path, bytes).await?;
        debug!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    async fn temp_save(&self, bytes: &[u8], suffix: &str) -> io::Result<PathBuf> {
        self.save(bytes, &format!(".tmp-{}{}", Uuid::new_v4(), suffix)).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    fn output_dir(&self) -> &Path {
        &self.dir
    }
}

/// File name component of `path`, for reporting.
pub fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}
