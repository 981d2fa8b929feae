use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants::THUMBNAIL_SUFFIX;

/// One response of `GET /{board}/thread/{no}.json`.
///
/// The root post is always first. Later snapshots may reorder or drop posts,
/// so nothing beyond `posts[0]` being the root is assumed.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadSnapshot {
    pub posts: Vec<Post>,
}

impl ThreadSnapshot {
    /// Decode a snapshot from the raw response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a thread document or has no posts.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_slice(body).context("Failed to decode thread snapshot")?;
        if snapshot.posts.is_empty() {
            anyhow::bail!("Thread snapshot contains no posts");
        }
        Ok(snapshot)
    }

    /// The thread's opening post.
    #[must_use]
    pub fn root(&self) -> &Post {
        &self.posts[0]
    }

    /// A thread stays live until the server closes or archives it.
    #[must_use]
    pub fn is_live(&self) -> bool {
        let root = self.root();
        root.archived == 0 && root.closed == 0
    }
}

/// A post as delivered by the API. Empty fields are omitted on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Post {
    pub no: i64,
    pub resto: i64,
    pub time: i64,
    pub name: String,
    pub trip: String,
    pub id: String,
    pub capcode: String,
    pub country: String,
    pub country_name: String,
    pub board_flag: String,
    pub flag_name: String,
    pub sub: String,
    pub com: String,
    pub since4pass: i64,

    // Attachment
    pub tim: i64,
    pub filename: String,
    pub ext: String,
    pub fsize: i64,
    pub md5: String,
    pub w: i64,
    pub h: i64,
    pub tn_w: i64,
    pub tn_h: i64,
    pub filedeleted: i64,

    // Root post only
    pub closed: i64,
    pub archived: i64,
}

impl Post {
    #[must_use]
    pub fn is_file_deleted(&self) -> bool {
        self.filedeleted == 1
    }

    /// Whether the post carries an attachment, live or deleted.
    #[must_use]
    pub fn has_attachment(&self) -> bool {
        self.fsize > 0 || self.is_file_deleted()
    }

    /// Server-side name of the attachment, e.g. `1700000000000.webm`.
    #[must_use]
    pub fn media_file_name(&self) -> String {
        format!("{}{}", self.tim, self.ext)
    }

    #[must_use]
    pub fn thumbnail_file_name(&self) -> String {
        format!("{}{THUMBNAIL_SUFFIX}", self.tim)
    }
}
