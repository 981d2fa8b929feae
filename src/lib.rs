//! Thread archiver library.
//!
//! Polls a single imageboard thread until it is closed or archived, records
//! every post exactly once in SQLite, and stores each attachment once in a
//! content-addressed store keyed by the fingerprint of its decoded content.

pub mod api;
pub mod archiver;
pub mod config;
pub mod constants;
pub mod db;
pub mod fingerprint;
pub mod shutdown;
pub mod store;
