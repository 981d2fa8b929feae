//! Client and data types for the read-only thread API.

mod client;
mod models;

pub use client::{ApiClient, FetchError};
pub use models::{Post, ThreadSnapshot};
