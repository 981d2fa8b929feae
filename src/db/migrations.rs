use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating post and media tables with lookup indexes");

    // Thread state (sticky, closed, replies, ...) is not kept per post.
    // Attachment columns live in `media`; `board` and `attachment` are ours.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS post (
            no INTEGER NOT NULL,
            resto INTEGER,
            time INTEGER,
            name TEXT,
            trip TEXT,
            id TEXT,
            capcode TEXT,
            country TEXT,
            country_name TEXT,
            board_flag TEXT,
            flag_name TEXT,
            sub TEXT,
            com TEXT,
            since4pass INTEGER,
            board TEXT NOT NULL,
            attachment BOOLEAN
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create post table")?;

    // `sha` is the SHA-1 of the first decoded video stream, so it does not
    // change with metadata, container or audio.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS media (
            no INTEGER NOT NULL,
            board TEXT NOT NULL,
            tim INTEGER,
            filename TEXT,
            ext TEXT,
            fsize INTEGER,
            md5 TEXT,
            w INTEGER,
            h INTEGER,
            tn_w INTEGER,
            tn_h INTEGER,
            filedeleted BOOLEAN,
            sha TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create media table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_post_no ON post(no)")
        .execute(pool)
        .await
        .context("Failed to create post(no) index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_no_board ON media(no, board)")
        .execute(pool)
        .await
        .context("Failed to create media(no, board) index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_sha ON media(sha)")
        .execute(pool)
        .await
        .context("Failed to create media(sha) index")?;

    Ok(())
}
