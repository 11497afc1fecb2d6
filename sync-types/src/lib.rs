//! # sync-types
//!
//! Shared vocabulary for the livesync reactive data-synchronization engine.
//!
//! This crate provides the foundational types used across all livesync crates:
//! - [`SessionId`], [`SubscriberId`], [`CacheId`], [`Topic`] - Identity types
//! - [`Selection`], [`SelectionSet`] - Recorded cache paths of a query
//! - [`CachePolicy`], [`CacheHandle`] - Freshness policy of the external cache
//! - [`FetchError`], [`SnapshotError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod error;
mod ids;
mod selection;

pub use cache::{CacheHandle, CachePolicy, Freshness};
pub use error::{FetchError, SnapshotError};
pub use ids::{CacheId, SessionId, SubscriberId, Topic};
pub use selection::{Selection, SelectionBuilder, SelectionSet};
