//! Integration tests for the thread archival loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thread_archiver::archiver::{RunOutcome, ThreadArchiver};
use thread_archiver::config::Config;
use thread_archiver::db::{
    count_media, count_media_by_sha, count_posts, get_media_for_post, get_post, Database,
};
use thread_archiver::fingerprint::{Fingerprint, FingerprintError, Fingerprinter};
use thread_archiver::shutdown::Shutdown;

const THREAD_PATH: &str = "/g/thread/1.json";
const MD5: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

/// Fingerprints the raw bytes, standing in for the decoder.
#[derive(Default)]
struct RawSha1 {
    calls: AtomicUsize,
}

#[async_trait]
impl Fingerprinter for RawSha1 {
    async fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint, FingerprintError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(raw_fingerprint(data))
    }
}

/// Every input decodes to the same content.
struct SameContent(Fingerprint);

#[async_trait]
impl Fingerprinter for SameContent {
    async fn fingerprint(&self, _data: &[u8]) -> Result<Fingerprint, FingerprintError> {
        Ok(self.0.clone())
    }
}

/// A decoder that is broken.
struct Broken;

#[async_trait]
impl Fingerprinter for Broken {
    async fn fingerprint(&self, _data: &[u8]) -> Result<Fingerprint, FingerprintError> {
        Err(FingerprintError::Invalid("decoder unavailable".to_string()))
    }
}

/// Delivers a termination request while a given attachment is being decoded.
struct SignalDuring {
    bytes: &'static [u8],
    shutdown: Shutdown,
}

#[async_trait]
impl Fingerprinter for SignalDuring {
    async fn fingerprint(&self, data: &[u8]) -> Result<Fingerprint, FingerprintError> {
        if data == self.bytes {
            self.shutdown.trigger();
        }
        Ok(raw_fingerprint(data))
    }
}

fn raw_fingerprint(data: &[u8]) -> Fingerprint {
    Fingerprint::from_digest(&Sha1::digest(data)).expect("SHA-1 digest is long enough")
}

fn op(closed: i64, archived: i64) -> Value {
    json!({"no": 1, "resto": 0, "time": 1_700_000_000, "sub": "thread",
           "com": "op", "closed": closed, "archived": archived})
}

fn reply_with_file(no: i64, tim: i64) -> Value {
    reply_with_ext(no, tim, ".png")
}

fn reply_with_ext(no: i64, tim: i64, ext: &str) -> Value {
    json!({"no": no, "resto": 1, "time": 1_700_000_000 + no, "com": format!("reply {no}"),
           "tim": tim, "filename": format!("file{no}"), "ext": ext, "fsize": 1024,
           "md5": MD5, "w": 800, "h": 600, "tn_w": 125, "tn_h": 94})
}

fn thread(posts: &[Value]) -> Value {
    json!({ "posts": posts })
}

async fn setup(server: &MockServer) -> (Config, Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config {
        api_base_url: server.uri(),
        media_base_url: server.uri(),
        ..Config::for_testing(temp_dir.path())
    };
    let db = Database::new(&config.database_path())
        .await
        .expect("Failed to create database");
    (config, db, temp_dir)
}

async fn mount_thread(server: &MockServer, body: &Value, expected_polls: u64) {
    Mock::given(method("GET"))
        .and(path(THREAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_polls)
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, file: &str, body: &[u8], expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/g/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, file: &str, status: u16, expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/g/{file}")))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .mount(server)
        .await;
}

fn archiver(config: &Config, db: &Database, fingerprinter: Arc<dyn Fingerprinter>) -> ThreadArchiver {
    ThreadArchiver::new(config.clone(), db.clone(), fingerprinter, Shutdown::new())
        .expect("Failed to build archiver")
}

fn count_files(dir: &std::path::Path) -> usize {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}

#[tokio::test]
async fn test_first_poll_records_posts_and_media_then_repoll_is_noop() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0), reply_with_file(2, 555)]), 2).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;
    mount_file(&server, "555s.jpg", b"thumb-bytes", 1).await;

    let fingerprinter = Arc::new(RawSha1::default());
    let archiver = archiver(&config, &db, fingerprinter.clone());

    let first = archiver.poll_once().await.expect("first poll failed");
    assert!(first.live);
    assert!(!first.interrupted);
    assert_eq!(first.stats.new_posts, 2);
    assert_eq!(first.stats.media_stored, 1);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 2);
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);

    let fp = raw_fingerprint(b"png-bytes");
    let stored = std::fs::read(archiver.store().media_path(&fp, ".png")).unwrap();
    assert_eq!(stored, b"png-bytes");
    let thumb = std::fs::read(archiver.store().thumbnail_path(&fp)).unwrap();
    assert_eq!(thumb, b"thumb-bytes");

    let media = get_media_for_post(db.pool(), 2, "g").await.unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].sha.as_deref(), Some(fp.as_str()));
    assert_eq!(media[0].tim, Some(555));
    assert_eq!(media[0].md5.as_deref(), Some(MD5));
    assert_eq!(media[0].filedeleted, Some(false));

    let second = archiver.poll_once().await.expect("second poll failed");
    assert_eq!(second.stats.posts_seen, 2);
    assert_eq!(second.stats.new_posts, 0);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 2);
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);
    assert_eq!(fingerprinter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resumed_run_skips_recorded_posts() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0), reply_with_file(2, 555)]), 2).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;
    mount_file(&server, "555s.jpg", b"thumb-bytes", 1).await;

    archiver(&config, &db, Arc::new(RawSha1::default()))
        .poll_once()
        .await
        .unwrap();

    // A fresh process over the same data directory
    let db = Database::new(&config.database_path()).await.unwrap();
    let pass = archiver(&config, &db, Arc::new(RawSha1::default()))
        .poll_once()
        .await
        .unwrap();
    assert_eq!(pass.stats.new_posts, 0);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_run_stops_after_single_pass_on_closed_thread() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(1, 0), reply_with_file(2, 555)]), 1).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;
    mount_file(&server, "555s.jpg", b"thumb-bytes", 1).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    let outcome = tokio::time::timeout(Duration::from_secs(10), archiver.run())
        .await
        .expect("run slept or re-polled after the thread closed")
        .unwrap();

    assert_eq!(outcome, RunOutcome::ThreadEnded);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 2);
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_run_stops_on_archived_thread() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 1)]), 1).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    let outcome = tokio::time::timeout(Duration::from_secs(10), archiver.run())
        .await
        .expect("run did not stop")
        .unwrap();

    assert_eq!(outcome, RunOutcome::ThreadEnded);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(
        &server,
        &thread(&[op(0, 0), reply_with_file(2, 555), reply_with_file(3, 666)]),
        1,
    )
    .await;
    mount_file(&server, "555.png", b"original-container", 1).await;
    mount_file(&server, "555s.jpg", b"thumb", 1).await;
    mount_file(&server, "666.png", b"re-muxed-container", 1).await;
    // The store already holds this content, so its thumbnail is never fetched.
    mount_file(&server, "666s.jpg", b"thumb", 0).await;

    let fp = Fingerprint::parse("aabbccddeeff00112233445566778899aabbccdd").unwrap();
    let archiver = archiver(&config, &db, Arc::new(SameContent(fp.clone())));

    let pass = archiver.poll_once().await.unwrap();
    assert_eq!(pass.stats.media_stored, 1);
    assert_eq!(pass.stats.media_deduplicated, 1);

    assert_eq!(count_media(db.pool()).await.unwrap(), 2);
    assert_eq!(count_media_by_sha(db.pool(), fp.as_str()).await.unwrap(), 2);

    // One main file plus its thumbnail
    assert_eq!(count_files(archiver.store().root()), 2);
    let stored = std::fs::read(archiver.store().media_path(&fp, ".png")).unwrap();
    assert_eq!(stored, b"original-container");
}

#[tokio::test]
async fn test_identical_content_in_another_container_is_stored_once() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(
        &server,
        &thread(&[op(0, 0), reply_with_ext(2, 555, ".webm"), reply_with_ext(3, 666, ".mp4")]),
        1,
    )
    .await;
    mount_file(&server, "555.webm", b"webm-container", 1).await;
    mount_file(&server, "555s.jpg", b"thumb", 1).await;
    mount_file(&server, "666.mp4", b"mp4-container", 1).await;
    mount_file(&server, "666s.jpg", b"thumb", 0).await;

    let fp = Fingerprint::parse("aabbccddeeff00112233445566778899aabbccdd").unwrap();
    let archiver = archiver(&config, &db, Arc::new(SameContent(fp.clone())));

    let pass = archiver.poll_once().await.unwrap();
    assert_eq!(pass.stats.media_stored, 1);
    assert_eq!(pass.stats.media_deduplicated, 1);

    // The first-seen container is kept
    assert_eq!(count_files(archiver.store().root()), 2);
    assert_eq!(
        archiver.store().find_media(&fp).await.unwrap(),
        Some(archiver.store().media_path(&fp, ".webm"))
    );
    assert!(!archiver.store().media_path(&fp, ".mp4").exists());

    // Each row keeps its own post's extension
    let second = get_media_for_post(db.pool(), 3, "g").await.unwrap();
    assert_eq!(second[0].ext.as_deref(), Some(".mp4"));
    assert_eq!(second[0].sha.as_deref(), Some(fp.as_str()));
    assert_eq!(count_media_by_sha(db.pool(), fp.as_str()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unsafe_extension_fails_before_store_writes() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(
        &server,
        &thread(&[op(0, 0), reply_with_ext(2, 555, "/../../escape")]),
        1,
    )
    .await;
    mount_file(&server, "555s.jpg", b"thumb", 0).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    assert!(archiver.poll_once().await.is_err());
    assert_eq!(count_files_or_zero(archiver.store().root()), 0);
    assert_eq!(count_media(db.pool()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_deleted_attachment_is_recorded_without_download() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    let deleted = json!({"no": 2, "resto": 1, "tim": 777, "ext": ".png",
                         "fsize": 0, "filedeleted": 1});
    mount_thread(&server, &thread(&[op(0, 0), deleted]), 1).await;
    mount_file(&server, "777.png", b"never", 0).await;
    mount_file(&server, "777s.jpg", b"never", 0).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    let pass = archiver.poll_once().await.unwrap();
    assert_eq!(pass.stats.media_deleted, 1);

    let post = get_post(db.pool(), 2).await.unwrap().expect("post not recorded");
    assert_eq!(post.attachment, Some(true));

    let media = get_media_for_post(db.pool(), 2, "g").await.unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].filedeleted, Some(true));
    assert_eq!(media[0].sha, None);
    assert_eq!(media[0].tim, None);

    let root = get_post(db.pool(), 1).await.unwrap().unwrap();
    assert_eq!(root.attachment, Some(false));
}

#[tokio::test]
async fn test_failed_download_is_abandoned_and_not_retried() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(
        &server,
        &thread(&[op(0, 0), reply_with_file(2, 555), reply_with_file(3, 666)]),
        2,
    )
    .await;
    mount_status(&server, "555.png", 404, 1).await;
    mount_file(&server, "666.png", b"second", 1).await;
    mount_file(&server, "666s.jpg", b"thumb", 1).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    let pass = archiver.poll_once().await.expect("fetch failure must not be fatal");
    assert_eq!(pass.stats.media_failed, 1);
    assert_eq!(pass.stats.media_stored, 1);

    assert!(get_post(db.pool(), 2).await.unwrap().is_some());
    assert!(get_media_for_post(db.pool(), 2, "g").await.unwrap().is_empty());
    assert_eq!(get_media_for_post(db.pool(), 3, "g").await.unwrap().len(), 1);

    let again = archiver.poll_once().await.unwrap();
    assert_eq!(again.stats.new_posts, 0);
}

#[tokio::test]
async fn test_thumbnail_failure_does_not_block_main_file() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0), reply_with_file(2, 555)]), 1).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;
    mount_status(&server, "555s.jpg", 500, 1).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    let pass = archiver.poll_once().await.unwrap();
    assert_eq!(pass.stats.media_stored, 1);

    let fp = raw_fingerprint(b"png-bytes");
    assert!(archiver.store().media_path(&fp, ".png").exists());
    assert!(!archiver.store().thumbnail_path(&fp).exists());
    assert_eq!(count_media(db.pool()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_decoder_failure_is_fatal() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0), reply_with_file(2, 555)]), 1).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;

    let archiver = archiver(&config, &db, Arc::new(Broken));
    assert!(archiver.poll_once().await.is_err());
    assert_eq!(count_media(db.pool()).await.unwrap(), 0);
    assert_eq!(count_files_or_zero(archiver.store().root()), 0);
}

#[tokio::test]
async fn test_undecodable_md5_is_fatal() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    let mut post = reply_with_file(2, 555);
    post["md5"] = json!("%%% not base64 %%%");
    mount_thread(&server, &thread(&[op(0, 0), post]), 1).await;
    mount_file(&server, "555.png", b"png-bytes", 1).await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    assert!(archiver.poll_once().await.is_err());
    assert_eq!(count_media(db.pool()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_thread_fetch_errors_are_fatal() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    Mock::given(method("GET"))
        .and(path(THREAD_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    assert!(archiver.run().await.is_err());
}

#[tokio::test]
async fn test_malformed_thread_json_is_fatal() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    Mock::given(method("GET"))
        .and(path(THREAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let archiver = archiver(&config, &db, Arc::new(RawSha1::default()));
    assert!(archiver.poll_once().await.is_err());
    assert_eq!(count_posts(db.pool()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_later_snapshot_may_drop_and_reorder_posts() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    Mock::given(method("GET"))
        .and(path(THREAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(&[
            op(0, 0),
            json!({"no": 2, "resto": 1, "com": "two"}),
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(THREAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(&[
            op(1, 0),
            json!({"no": 4, "resto": 1, "com": "four"}),
            json!({"no": 3, "resto": 1, "com": "three"}),
        ])))
        .with_priority(2)
        .mount(&server)
        .await;

    let archiver = archiver(
        &config,
        &db,
        Arc::new(RawSha1::default()),
    );
    let first = archiver.poll_once().await.unwrap();
    assert_eq!(first.stats.new_posts, 2);

    let second = archiver.poll_once().await.unwrap();
    assert!(!second.live);
    assert_eq!(second.stats.new_posts, 2);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 4);

    // Recorded posts are never touched again, even if the server edits them.
    let two = get_post(db.pool(), 2).await.unwrap().unwrap();
    assert_eq!(two.com.as_deref(), Some("two"));
}

#[tokio::test]
async fn test_signal_mid_post_finishes_that_post_only() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(
        &server,
        &thread(&[
            op(0, 0),
            reply_with_file(2, 555),
            reply_with_file(3, 666),
            reply_with_file(4, 777),
        ]),
        1,
    )
    .await;
    mount_file(&server, "555.png", b"first", 1).await;
    mount_file(&server, "555s.jpg", b"thumb", 1).await;
    mount_file(&server, "666.png", b"second", 1).await;
    mount_file(&server, "666s.jpg", b"thumb", 1).await;
    mount_file(&server, "777.png", b"third", 0).await;

    let shutdown = Shutdown::new();
    let fingerprinter = SignalDuring {
        bytes: b"second",
        shutdown: shutdown.clone(),
    };
    let archiver =
        ThreadArchiver::new(config.clone(), db.clone(), Arc::new(fingerprinter), shutdown)
            .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), archiver.run())
        .await
        .expect("run did not stop")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);

    // Post 3 was in flight: its row, media row and file are all complete.
    assert!(get_post(db.pool(), 3).await.unwrap().is_some());
    assert_eq!(get_media_for_post(db.pool(), 3, "g").await.unwrap().len(), 1);
    let fp = raw_fingerprint(b"second");
    assert!(archiver.store().media_path(&fp, ".png").exists());

    // Post 4 was never started.
    assert!(get_post(db.pool(), 4).await.unwrap().is_none());
    assert_eq!(count_posts(db.pool()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_signal_while_idle_exits_immediately() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0), json!({"no": 2, "resto": 1})]), 1).await;

    let config = Config {
        poll_interval: Duration::from_secs(3600),
        ..config
    };
    let shutdown = Shutdown::new();
    let archiver = ThreadArchiver::new(
        config,
        db.clone(),
        Arc::new(RawSha1::default()),
        shutdown.clone(),
    )
    .unwrap();
    let handle = tokio::spawn(async move { archiver.run().await });

    // Wait for the first pass to land, then signal during the long sleep.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while count_posts(db.pool()).await.unwrap() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "first pass never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.trigger();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("idle sleep was not interrupted")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
}

#[tokio::test]
async fn test_signal_before_start_does_not_poll() {
    let server = MockServer::start().await;
    let (config, db, _temp_dir) = setup(&server).await;

    mount_thread(&server, &thread(&[op(0, 0)]), 0).await;

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let archiver =
        ThreadArchiver::new(config, db.clone(), Arc::new(RawSha1::default()), shutdown).unwrap();

    assert_eq!(archiver.run().await.unwrap(), RunOutcome::Interrupted);
    assert_eq!(count_posts(db.pool()).await.unwrap(), 0);
}

fn count_files_or_zero(dir: &std::path::Path) -> usize {
    if dir.exists() {
        count_files(dir)
    } else {
        0
    }
}
