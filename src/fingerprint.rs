//! Content fingerprints of decoded media.
//!
//! Two attachments get the same fingerprint when their first video stream
//! decodes to the same frames, regardless of container, metadata or audio.
//! Decoding is delegated to ffmpeg; the decoded frames are hashed with SHA-1.

use std::fmt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Lowercase hex fingerprint of a decoded content stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Shortest fingerprint that still yields three shard directories.
    pub const MIN_LEN: usize = 6;

    /// Hex-encode a raw digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest is too short to shard.
    pub fn from_digest(digest: &[u8]) -> Result<Self, FingerprintError> {
        let text = hex::encode(digest);
        if text.len() < Self::MIN_LEN {
            return Err(FingerprintError::Invalid(text));
        }
        Ok(Self(text))
    }

    /// Parse a hex fingerprint, normalizing it to lowercase.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is too short or not hexadecimal.
    pub fn parse(text: &str) -> Result<Self, FingerprintError> {
        if text.len() < Self::MIN_LEN || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FingerprintError::Invalid(text.to_string()));
        }
        Ok(Self(text.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three directory levels a fingerprint is sharded under.
    #[must_use]
    pub fn shards(&self) -> [&str; 3] {
        [&self.0[0..2], &self.0[2..4], &self.0[4..6]]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("'{0}' is not a hex fingerprint")]
    Invalid(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O with {program} failed: {source}")]
    Pipe {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Computes the fingerprint of raw attachment bytes.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the content cannot be decoded. Callers treat this
    /// as an environment failure.
    async fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint, FingerprintError>;
}

/// Fingerprints the first video stream decoded by ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegFingerprinter {
    program: String,
}

impl FfmpegFingerprinter {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that the decoder can be started.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn pipe_error(&self, source: std::io::Error) -> FingerprintError {
        FingerprintError::Pipe {
            program: self.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl Fingerprinter for FfmpegFingerprinter {
    async fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint, FingerprintError> {
        let mut child = Command::new(&self.program)
            .args([
                "-loglevel", "error", "-i", "-", "-map", "0:v:0", "-f", "rawvideo", "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FingerprintError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let missing = || std::io::Error::other("child pipe not captured");
        let mut stdin = child.stdin.take().ok_or_else(|| self.pipe_error(missing()))?;
        let mut stdout = child.stdout.take().ok_or_else(|| self.pipe_error(missing()))?;
        let mut stderr = child.stderr.take().ok_or_else(|| self.pipe_error(missing()))?;

        // All three pipes are driven together so neither side can block on a
        // full pipe buffer.
        let feed = async move {
            stdin.write_all(data).await?;
            stdin.shutdown().await
        };
        let hash = async move {
            let mut hasher = Sha1::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok::<_, std::io::Error>(hasher.finalize())
        };
        let diagnostics = async move {
            let mut text = String::new();
            stderr.read_to_string(&mut text).await.map(|_| text)
        };

        let (fed, digest, diagnostics) = tokio::join!(feed, hash, diagnostics);
        let status = child.wait().await.map_err(|e| self.pipe_error(e))?;

        if !status.success() {
            return Err(FingerprintError::Exit {
                program: self.program.clone(),
                status,
                stderr: diagnostics.unwrap_or_default().trim().to_string(),
            });
        }
        fed.map_err(|e| self.pipe_error(e))?;
        let digest = digest.map_err(|e| self.pipe_error(e))?;

        let fingerprint = Fingerprint::from_digest(&digest)?;
        debug!(fingerprint = %fingerprint, bytes = data.len(), "Computed content fingerprint");
        Ok(fingerprint)
    }
}
