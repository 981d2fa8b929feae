use anyhow::Result;
use tracing::{debug, info};

use super::media::MediaOutcome;
use super::ThreadArchiver;
use crate::api::Post;
use crate::db::{insert_deleted_media, insert_post, post_exists, NewPost};

/// What ingesting one post did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// The post was recorded by an earlier pass or run; nothing was done.
    AlreadyRecorded,
    /// The post was recorded and has no attachment.
    Recorded,
    /// The post was recorded along with a deleted-attachment marker.
    DeletedMedia,
    /// The post was recorded and its attachment handed to the media archiver.
    Media(MediaOutcome),
}

impl ThreadArchiver {
    /// Record a post unless it already is, then archive its attachment.
    pub(super) async fn ingest_post(&self, post: &Post) -> Result<Ingested> {
        let pool = self.db.pool();
        let board = self.config.board.as_str();

        if post_exists(pool, post.no).await? {
            debug!(no = post.no, "Already archived");
            return Ok(Ingested::AlreadyRecorded);
        }

        insert_post(pool, &NewPost::from_api(post, board)).await?;
        debug!(no = post.no, attachment = post.has_attachment(), "Recorded post");

        if !post.has_attachment() {
            return Ok(Ingested::Recorded);
        }

        if post.is_file_deleted() {
            info!(no = post.no, "File from post is deleted");
            insert_deleted_media(pool, post.no, board).await?;
            return Ok(Ingested::DeletedMedia);
        }

        let outcome = self.archive_media(post).await?;
        Ok(Ingested::Media(outcome))
    }
}
