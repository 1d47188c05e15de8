//! Staging and results directories.
//!
//! Files are keyed by a random identifier generated per upload. The client's
//! filename never reaches the filesystem; it only travels with the result as
//! display metadata.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::encoding::OutputFormat;

const KEY_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// Opaque per-upload identifier: 32 lowercase hex characters.
pub struct UploadKey(String);

impl UploadKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == KEY_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Name of a processed image inside the results directory.
pub struct StoredName {
    key: UploadKey,
    format: OutputFormat,
}

impl StoredName {
    pub fn new(key: UploadKey, format: OutputFormat) -> Self {
        Self { key, format }
    }

    /// Accepts only names this service generates, e.g. `<key>.jpg`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (key, ext) = raw.split_once('.')?;
        let key = UploadKey::parse(key)?;
        let format = OutputFormat::from_extension(ext)?;
        (format.extension() == ext).then_some(Self { key, format })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.key.as_str(), self.format.extension())
    }
}

/// The inbound staging area and the outbound results area.
#[derive(Debug)]
pub struct Storage {
    uploads: PathBuf,
    processed: PathBuf,
}

impl Storage {
    /// Create both directories if they are missing.
    pub fn init(uploads: impl Into<PathBuf>, processed: impl Into<PathBuf>) -> Result<Self> {
        let uploads = uploads.into();
        let processed = processed.into();
        for dir in [&uploads, &processed] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        debug!(
            uploads = %uploads.display(),
            processed = %processed.display(),
            "storage directories ready"
        );
        Ok(Self { uploads, processed })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed
    }

    pub fn staged_path(&self, key: &UploadKey) -> PathBuf {
        self.uploads.join(key.as_str())
    }

    pub fn processed_path(&self, name: &StoredName) -> PathBuf {
        self.processed.join(name.to_string())
    }

    /// Persist raw upload bytes. The returned guard deletes the file when
    /// dropped unless it was already removed.
    pub fn stage(&self, key: &UploadKey, bytes: &[u8]) -> io::Result<StagedUpload> {
        let path = self.staged_path(key);
        fs::write(&path, bytes)?;
        Ok(StagedUpload {
            path,
            removed: false,
        })
    }

    /// Read a processed image; `Ok(None)` when it does not exist.
    pub fn read_processed(&self, name: &StoredName) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.processed_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Raw upload sitting in the staging directory.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    removed: bool,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove staged upload {}: {err}", self.path.display());
            }
        }
    }
}
