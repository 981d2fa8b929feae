//! Content-addressed media store.
//!
//! Files live at `{root}/{fp[0:2]}/{fp[2:4]}/{fp[4:6]}/{fp}{ext}`, thumbnails
//! next to them as `{fp}s.jpg`. A path is written at most once and never
//! rewritten. The dedup gate is the fingerprint alone: once any `{fp}.*` main
//! file exists, the same content under another extension is not stored again.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::constants::THUMBNAIL_SUFFIX;
use crate::fingerprint::Fingerprint;

/// Suffix of in-progress writes; renamed away once the file is complete.
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of a fingerprint.
    #[must_use]
    pub fn shard_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        let [a, b, c] = fingerprint.shards();
        self.root.join(a).join(b).join(c)
    }

    #[must_use]
    pub fn media_path(&self, fingerprint: &Fingerprint, ext: &str) -> PathBuf {
        self.shard_dir(fingerprint)
            .join(format!("{fingerprint}{ext}"))
    }

    #[must_use]
    pub fn thumbnail_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.shard_dir(fingerprint)
            .join(format!("{fingerprint}{THUMBNAIL_SUFFIX}"))
    }

    /// Locate the main file stored for this fingerprint, whatever extension it
    /// was first stored with.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard directory cannot be read.
    pub async fn find_media(&self, fingerprint: &Fingerprint) -> Result<Option<PathBuf>> {
        let dir = self.shard_dir(fingerprint);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read {}", dir.display()))
            }
        };

        let stem = fingerprint.as_str();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_main_file_name(name, stem) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Whether content with this fingerprint is already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    pub async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.find_media(fingerprint).await?.is_some())
    }

    /// Store the main file unless content with this fingerprint is already
    /// stored under any extension. Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is unsafe or the write fails.
    pub async fn put_media(&self, fingerprint: &Fingerprint, ext: &str, data: &[u8]) -> Result<bool> {
        check_ext(ext)?;
        if let Some(existing) = self.find_media(fingerprint).await? {
            debug!(path = %existing.display(), "Already stored");
            return Ok(false);
        }
        let path = self.media_path(fingerprint, ext);
        self.put(&path, data).await
    }

    /// Store the thumbnail unless it already exists. Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn put_thumbnail(&self, fingerprint: &Fingerprint, data: &[u8]) -> Result<bool> {
        let path = self.thumbnail_path(fingerprint);
        self.put(&path, data).await
    }

    async fn put(&self, path: &Path, data: &[u8]) -> Result<bool> {
        if tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check {}", path.display()))?
        {
            debug!(path = %path.display(), "Already stored");
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        write_atomic(path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Stored file");
        Ok(true)
    }
}

/// Write to a sibling partial file, then rename it into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, data)
        .await
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    tokio::fs::rename(&partial, path)
        .await
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// `{fp}` or `{fp}.{ext}`, excluding the thumbnail and in-progress writes.
fn is_main_file_name(name: &str, stem: &str) -> bool {
    match name.strip_prefix(stem) {
        Some("") => true,
        Some(rest) => rest.starts_with('.') && !rest.ends_with(PARTIAL_SUFFIX),
        None => false,
    }
}

/// Extensions come from the server and end up in a file name.
///
/// # Errors
///
/// Returns an error if the extension could escape the shard directory.
pub fn check_ext(ext: &str) -> Result<()> {
    let valid = ext.is_empty()
        || (ext.starts_with('.') && ext[1..].bytes().all(|b| b.is_ascii_alphanumeric()));
    if !valid {
        anyhow::bail!("Refusing to store file with extension {ext:?}");
    }
    Ok(())
}
