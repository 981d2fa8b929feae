use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};

use super::ThreadArchiver;
use crate::api::Post;
use crate::db::{insert_media, NewMedia};
use crate::fingerprint::Fingerprint;
use crate::store::check_ext;

/// What archiving one attachment did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOutcome {
    /// The file was new and is now in the store.
    Stored,
    /// Content with the same fingerprint was already stored.
    Deduplicated,
    /// The download failed; the post stays recorded without media.
    FetchFailed,
}

impl ThreadArchiver {
    /// Download, fingerprint and store a post's live attachment, then record it.
    ///
    /// A failed download is logged and abandoned. Decoder and storage
    /// failures are returned.
    pub(super) async fn archive_media(&self, post: &Post) -> Result<MediaOutcome> {
        let board = self.config.board.as_str();
        let file_name = post.media_file_name();

        // Checked before anything touches the store.
        check_ext(&post.ext).with_context(|| format!("Unusable attachment for post {}", post.no))?;

        info!(no = post.no, file = %file_name, "Downloading");
        let data = match self.api.fetch_attachment(board, post).await {
            Ok(data) => data,
            Err(e) => {
                warn!(no = post.no, file = %file_name, "Couldn't get file: {e}");
                return Ok(MediaOutcome::FetchFailed);
            }
        };

        let fingerprint = self
            .fingerprinter
            .fingerprint(&data)
            .await
            .with_context(|| format!("Failed to fingerprint {file_name}"))?;

        let md5 = decode_md5(&post.md5)
            .with_context(|| format!("Invalid md5 for post {}", post.no))?;
        debug!(no = post.no, md5 = %md5, fingerprint = %fingerprint, "Decoded attachment");

        let outcome = if let Some(existing) = self.store.find_media(&fingerprint).await? {
            debug!(
                no = post.no,
                fingerprint = %fingerprint,
                path = %existing.display(),
                "Content already stored"
            );
            MediaOutcome::Deduplicated
        } else {
            self.archive_thumbnail(post, &fingerprint).await?;
            self.store.put_media(&fingerprint, &post.ext, &data).await?;
            MediaOutcome::Stored
        };

        insert_media(self.db.pool(), &NewMedia::from_api(post, board, &fingerprint)).await?;

        // The post is fully recorded; waking early here is safe.
        self.shutdown.sleep(self.config.request_pacing).await;

        Ok(outcome)
    }

    /// Best-effort thumbnail download. Only storage failures are returned.
    async fn archive_thumbnail(&self, post: &Post, fingerprint: &Fingerprint) -> Result<()> {
        // Mid-post: this wait must not be cut short.
        tokio::time::sleep(self.config.request_pacing).await;

        match self.api.fetch_thumbnail(&self.config.board, post).await {
            Ok(data) => {
                self.store.put_thumbnail(fingerprint, &data).await?;
            }
            Err(e) => {
                warn!(no = post.no, file = %post.thumbnail_file_name(), "Couldn't get thumbnail: {e}");
            }
        }
        Ok(())
    }
}

/// Hex form of the server's base64 MD5, for cross-referencing in logs.
fn decode_md5(encoded: &str) -> Result<String> {
    let raw = STANDARD
        .decode(encoded)
        .with_context(|| format!("'{encoded}' is not valid base64"))?;
    Ok(hex::encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_md5() {
        assert_eq!(
            decode_md5("1B2M2Y8AsgTpgAmY7PhCfg==").unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert!(decode_md5("not base64!").is_err());
    }
}
