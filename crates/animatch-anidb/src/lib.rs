//! AniDB title dump download and caching.

pub mod client;
pub mod error;

pub use client::AniDbTitleSource;
pub use error::AniDbError;

/// Provider directory name under the cache root.
pub const PROVIDER: &str = "anidb";
