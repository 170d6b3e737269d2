//! Media server capability contract
//!
//! The engines only ever talk to a media server through [`MediaServer`]:
//! list libraries, list collections, pin, unpin. The Plex client in
//! [`crate::plex`] is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::PinningTargets;

/// Errors reported by a media server call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// A library section on the media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Library {
    /// Server-side section id.
    pub key: String,
    pub title: String,
}

/// A curated collection inside one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    /// Server-side id, used for API calls only.
    pub rating_key: String,
    pub title: String,
    pub library: String,
    pub item_count: u32,
    /// Currently promoted on a hub surface the caller's targets enable.
    pub pinned: bool,
    /// Filled from the exclusion ledger, never by the server.
    pub last_pinned: Option<DateTime<Utc>>,
}

/// Capability set the pinning engine needs from a media server.
#[async_trait]
pub trait MediaServer: Send + Sync {
    async fn list_libraries(&self) -> Result<Vec<Library>, MediaError>;

    /// Collections of the library titled `library`. `pinned` reflects the
    /// hub surfaces enabled in `targets`.
    async fn list_collections(
        &self,
        library: &str,
        targets: &PinningTargets,
    ) -> Result<Vec<Collection>, MediaError>;

    /// Promote `collection` on the hub surfaces enabled in `targets`.
    async fn pin(&self, collection: &Collection, targets: &PinningTargets) -> Result<(), MediaError>;

    /// Demote `collection` from the hub surfaces enabled in `targets`.
    async fn unpin(&self, collection: &Collection, targets: &PinningTargets)
        -> Result<(), MediaError>;
}
