//! # geopin
//!
//! A command-line virtual tourist: drop pins on the map, and each pin
//! collects an album of geotagged photos from the Flickr search API.
//!
//! Albums are fetched lazily through a two-phase search (page-count
//! discovery, then one random page), persisted in a YAML pin index, and
//! backed by a content-addressed image cache that stays coherent with the
//! persisted records: images are downloaded on first display and evicted
//! whenever their record is deleted.
//!
//! ## Features
//!
//! - Drop and delete pins with validated coordinates
//! - Lazy one-shot album fetch per pin, refreshable on demand
//! - Atomic album commits: a crash never leaves a half-written album
//! - Parallel image prefetching with per-image failure isolation
//! - Restart-safe image cache with eviction tied to record deletion

// Export modules for integration testing
pub mod album;
pub mod bbox;
pub mod cache;
pub mod config;
pub mod flickr;
pub mod store;
