use serde::{Deserialize, Serialize};

use crate::api::Post;
use crate::fingerprint::Fingerprint;

/// A recorded post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRow {
    pub no: i64,
    pub resto: Option<i64>,
    pub time: Option<i64>,
    pub name: Option<String>,
    pub trip: Option<String>,
    pub id: Option<String>,
    pub capcode: Option<String>,
    pub country: Option<String>,
    pub country_name: Option<String>,
    pub board_flag: Option<String>,
    pub flag_name: Option<String>,
    pub sub: Option<String>,
    pub com: Option<String>,
    pub since4pass: Option<i64>,
    pub board: String,
    pub attachment: Option<bool>,
}

/// A recorded attachment. Rows for deleted files only carry `no`, `board`
/// and `filedeleted`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaRow {
    pub no: i64,
    pub board: String,
    pub tim: Option<i64>,
    pub filename: Option<String>,
    pub ext: Option<String>,
    pub fsize: Option<i64>,
    pub md5: Option<String>,
    pub w: Option<i64>,
    pub h: Option<i64>,
    pub tn_w: Option<i64>,
    pub tn_h: Option<i64>,
    pub filedeleted: Option<bool>,
    pub sha: Option<String>,
}

/// Data for inserting a post.
#[derive(Debug, Clone)]
pub struct NewPost {
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
    pub board: String,
    pub attachment: bool,
}

impl NewPost {
    #[must_use]
    pub fn from_api(post: &Post, board: &str) -> Self {
        Self {
            no: post.no,
            resto: post.resto,
            time: post.time,
            name: post.name.clone(),
            trip: post.trip.clone(),
            id: post.id.clone(),
            capcode: post.capcode.clone(),
            country: post.country.clone(),
            country_name: post.country_name.clone(),
            board_flag: post.board_flag.clone(),
            flag_name: post.flag_name.clone(),
            sub: post.sub.clone(),
            com: post.com.clone(),
            since4pass: post.since4pass,
            board: board.to_string(),
            attachment: post.has_attachment(),
        }
    }
}

/// Data for inserting a present attachment.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub no: i64,
    pub board: String,
    pub tim: i64,
    pub filename: String,
    pub ext: String,
    pub fsize: i64,
    pub md5: String,
    pub w: i64,
    pub h: i64,
    pub tn_w: i64,
    pub tn_h: i64,
    pub sha: String,
}

impl NewMedia {
    #[must_use]
    pub fn from_api(post: &Post, board: &str, fingerprint: &Fingerprint) -> Self {
        Self {
            no: post.no,
            board: board.to_string(),
            tim: post.tim,
            filename: post.filename.clone(),
            ext: post.ext.clone(),
            fsize: post.fsize,
            md5: post.md5.clone(),
            w: post.w,
            h: post.h,
            tn_w: post.tn_w,
            tn_h: post.tn_h,
            sha: fingerprint.as_str().to_string(),
        }
    }
}
