use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{MediaRow, NewMedia, NewPost, PostRow};

// ========== Posts ==========

/// Whether a post with this number has already been recorded.
pub async fn post_exists(pool: &SqlitePool, no: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT no FROM post WHERE no == ? LIMIT 1")
        .bind(no)
        .fetch_optional(pool)
        .await
        .context("Failed to look up post")?;
    Ok(row.is_some())
}

/// Get a recorded post by number.
pub async fn get_post(pool: &SqlitePool, no: i64) -> Result<Option<PostRow>> {
    sqlx::query_as("SELECT * FROM post WHERE no == ? LIMIT 1")
        .bind(no)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Record a post.
pub async fn insert_post(pool: &SqlitePool, post: &NewPost) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post (
            no, resto, time, name, trip, id, capcode, country, country_name,
            board_flag, flag_name, sub, com, since4pass, board, attachment
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(post.no)
    .bind(post.resto)
    .bind(post.time)
    .bind(&post.name)
    .bind(&post.trip)
    .bind(&post.id)
    .bind(&post.capcode)
    .bind(&post.country)
    .bind(&post.country_name)
    .bind(&post.board_flag)
    .bind(&post.flag_name)
    .bind(&post.sub)
    .bind(&post.com)
    .bind(post.since4pass)
    .bind(&post.board)
    .bind(post.attachment)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert post {}", post.no))?;

    Ok(())
}

/// Count recorded posts.
pub async fn count_posts(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post")
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(count)
}

// ========== Media ==========

/// Record that a post's attachment was deleted by the server.
pub async fn insert_deleted_media(pool: &SqlitePool, no: i64, board: &str) -> Result<()> {
    sqlx::query("INSERT INTO media (no, board, filedeleted) VALUES (?, ?, ?)")
        .bind(no)
        .bind(board)
        .bind(true)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to insert deleted media for post {no}"))?;

    Ok(())
}

/// Record a present attachment.
pub async fn insert_media(pool: &SqlitePool, media: &NewMedia) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO media (
            no, board, tim, filename, ext, fsize, md5, w, h, tn_w, tn_h, filedeleted, sha
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(media.no)
    .bind(&media.board)
    .bind(media.tim)
    .bind(&media.filename)
    .bind(&media.ext)
    .bind(media.fsize)
    .bind(&media.md5)
    .bind(media.w)
    .bind(media.h)
    .bind(media.tn_w)
    .bind(media.tn_h)
    .bind(false)
    .bind(&media.sha)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert media for post {}", media.no))?;

    Ok(())
}

/// Get the media rows recorded for a post.
pub async fn get_media_for_post(pool: &SqlitePool, no: i64, board: &str) -> Result<Vec<MediaRow>> {
    sqlx::query_as("SELECT * FROM media WHERE no == ? AND board == ?")
        .bind(no)
        .bind(board)
        .fetch_all(pool)
        .await
        .context("Failed to fetch media for post")
}

/// Count recorded media rows.
pub async fn count_media(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media")
        .fetch_one(pool)
        .await
        .context("Failed to count media")?;
    Ok(count)
}

/// Count media rows sharing a content fingerprint.
pub async fn count_media_by_sha(pool: &SqlitePool, sha: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media WHERE sha == ?")
        .bind(sha)
        .fetch_one(pool)
        .await
        .context("Failed to count media by fingerprint")?;
    Ok(count)
}
