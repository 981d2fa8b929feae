//! The thread archival loop.
//!
//! [`ThreadArchiver::run`] polls one thread until the server closes or
//! archives it. Every pass walks the snapshot in delivered order and ingests
//! each post exactly once; attachments go to the content-addressed store.

mod ingest;
mod media;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::config::Config;
use crate::db::Database;
use crate::fingerprint::Fingerprinter;
use crate::shutdown::{Shutdown, Wakeup};
use crate::store::ContentStore;

pub use ingest::Ingested;
pub use media::MediaOutcome;

/// Why [`ThreadArchiver::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The thread was closed or archived and its final snapshot is ingested.
    ThreadEnded,
    /// Shutdown was requested.
    Interrupted,
}

/// Counters for a single pass over a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub posts_seen: u64,
    pub new_posts: u64,
    pub media_stored: u64,
    pub media_deduplicated: u64,
    pub media_deleted: u64,
    pub media_failed: u64,
}

impl PassStats {
    fn record(&mut self, ingested: Ingested) {
        self.posts_seen += 1;
        match ingested {
            Ingested::AlreadyRecorded => return,
            Ingested::Recorded => {}
            Ingested::DeletedMedia => self.media_deleted += 1,
            Ingested::Media(MediaOutcome::Stored) => self.media_stored += 1,
            Ingested::Media(MediaOutcome::Deduplicated) => self.media_deduplicated += 1,
            Ingested::Media(MediaOutcome::FetchFailed) => self.media_failed += 1,
        }
        self.new_posts += 1;
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    /// Liveness of the thread according to this snapshot's root post.
    pub live: bool,
    /// The pass stopped early at a post boundary because of shutdown.
    pub interrupted: bool,
    pub stats: PassStats,
}

/// Archives one thread. All collaborators are owned here and used from a
/// single sequential loop.
pub struct ThreadArchiver {
    config: Config,
    db: Database,
    api: ApiClient,
    store: ContentStore,
    fingerprinter: Arc<dyn Fingerprinter>,
    shutdown: Shutdown,
}

impl ThreadArchiver {
    /// Create an archiver for the thread named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: Config,
        db: Database,
        fingerprinter: Arc<dyn Fingerprinter>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let api = ApiClient::new(&config.api_base_url, &config.media_base_url)?;
        let store = ContentStore::new(config.media_root());
        Ok(Self {
            config,
            db,
            api,
            store,
            fingerprinter,
            shutdown,
        })
    }

    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Poll until the thread ends or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure that must end the process: the thread
    /// cannot be fetched or decoded, the database fails, or the decoder fails.
    pub async fn run(&self) -> Result<RunOutcome> {
        info!(
            board = %self.config.board,
            thread = self.config.thread_no,
            "Archiving thread"
        );

        loop {
            if self.shutdown.is_triggered() {
                return Ok(RunOutcome::Interrupted);
            }

            let pass = self.poll_once().await?;
            info!(
                live = pass.live,
                posts = pass.stats.posts_seen,
                new_posts = pass.stats.new_posts,
                media_stored = pass.stats.media_stored,
                media_deduplicated = pass.stats.media_deduplicated,
                media_deleted = pass.stats.media_deleted,
                media_failed = pass.stats.media_failed,
                "Poll complete"
            );

            if pass.interrupted || self.shutdown.is_triggered() {
                info!("Stopped at post boundary");
                return Ok(RunOutcome::Interrupted);
            }

            if !pass.live {
                info!(thread = self.config.thread_no, "Thread closed or archived");
                return Ok(RunOutcome::ThreadEnded);
            }

            debug!(secs = self.config.poll_interval.as_secs(), "Sleeping until next poll");
            if self.shutdown.sleep(self.config.poll_interval).await == Wakeup::Cancelled {
                info!("Interrupted while idle");
                return Ok(RunOutcome::Interrupted);
            }
        }
    }

    /// Fetch the current snapshot and ingest it once.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure that must end the process.
    pub async fn poll_once(&self) -> Result<PassOutcome> {
        let snapshot = self
            .api
            .fetch_thread(&self.config.board, self.config.thread_no)
            .await
            .context("Failed to fetch thread")?;

        let live = snapshot.is_live();
        let mut stats = PassStats::default();
        let mut interrupted = false;

        for post in &snapshot.posts {
            if !self.shutdown.may_proceed() {
                interrupted = true;
                break;
            }
            let ingested = self.ingest_post(post).await?;
            stats.record(ingested);
        }

        Ok(PassOutcome {
            live,
            interrupted,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_stats_record() {
        let mut stats = PassStats::default();
        stats.record(Ingested::AlreadyRecorded);
        stats.record(Ingested::Recorded);
        stats.record(Ingested::DeletedMedia);
        stats.record(Ingested::Media(MediaOutcome::Stored));
        stats.record(Ingested::Media(MediaOutcome::Deduplicated));
        stats.record(Ingested::Media(MediaOutcome::FetchFailed));

        assert_eq!(
            stats,
            PassStats {
                posts_seen: 6,
                new_posts: 5,
                media_stored: 1,
                media_deduplicated: 1,
                media_deleted: 1,
                media_failed: 1,
            }
        );
    }
}
