//! Shared constants used across the application.

use std::time::Duration;

/// User agent string sent with every API and media request.
pub const ARCHIVER_USER_AGENT: &str = concat!("thread-archiver/", env!("CARGO_PKG_VERSION"));

/// Base URL of the JSON API host.
pub const DEFAULT_API_BASE_URL: &str = "https://a.4cdn.org";

/// Base URL of the media host.
pub const DEFAULT_MEDIA_BASE_URL: &str = "https://i.4cdn.org";

/// Time between two polls of a thread that is still live.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum spacing between consecutive media requests.
pub const DEFAULT_REQUEST_PACING: Duration = Duration::from_secs(1);

/// Name of the external decoder used for fingerprinting.
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

/// Suffix the media host appends to `tim` for thumbnails, and the one we
/// append to the fingerprint when storing them.
pub const THUMBNAIL_SUFFIX: &str = "s.jpg";

/// Subdirectory of the data directory used as the content-addressed store.
pub const MEDIA_DIR_NAME: &str = "media";

/// File name of the SQLite database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "db.sql";

/// Directory name appended to the per-user state directory.
pub const APP_DIR_NAME: &str = "aos";
