//! Single-show podcast feed store.
//!
//! The [`storage::FeedStore`] owns the podcast, persists it as an RSS 2.0 +
//! iTunes document with an atomic replace, and serves the same document with
//! relative media paths turned into absolute URLs.

pub mod config;
pub mod feed;
pub mod model;
pub mod storage;
