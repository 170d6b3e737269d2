//! Plex implementation of [`MediaServer`].
//!
//! Talks to the Plex HTTP API with JSON responses. Collection pins are hub
//! visibility flags managed under `/hubs/sections/{section}/manage`; a
//! collection counts as pinned when a promotion flag is set on a surface the
//! pinning targets enable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{MediaServerConfig, PinningTargets};
use crate::media::{Collection, Library, MediaError, MediaServer};

const TOKEN_HEADER: &str = "X-Plex-Token";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Default, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<SectionEntry>,
}

#[derive(Debug, Deserialize)]
struct SectionEntry {
    key: String,
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionsContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    title: String,
    #[serde(rename = "childCount", default, deserialize_with = "lenient_count")]
    child_count: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ManagedHubsContainer {
    #[serde(rename = "Hub", default)]
    hubs: Vec<ManagedHub>,
}

#[derive(Debug, Deserialize)]
struct ManagedHub {
    identifier: String,
    #[serde(rename = "promotedToRecommended", default)]
    recommended: bool,
    #[serde(rename = "promotedToOwnHome", default)]
    own_home: bool,
    #[serde(rename = "promotedToSharedHome", default)]
    shared_home: bool,
}

impl ManagedHub {
    /// Promoted on a surface enabled in `targets`. With every surface
    /// disabled, any promotion counts.
    fn is_promoted(&self, targets: &PinningTargets) -> bool {
        if !targets.any() {
            return self.recommended || self.own_home || self.shared_home;
        }
        (targets.library_recommended && self.recommended)
            || (targets.home && self.own_home)
            || (targets.shared_home && self.shared_home)
    }
}

/// Plex reports counts as numbers or numeric strings depending on version.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Hub identifier Plex assigns to a collection's managed hub.
fn hub_identifier(section_key: &str, rating_key: &str) -> String {
    format!("custom.collection.{}.{}", section_key, rating_key)
}

/// Query parameters that set the enabled promotion flags to `value`.
fn visibility_params(targets: &PinningTargets, value: bool) -> Vec<(&'static str, &'static str)> {
    let flag = if value { "1" } else { "0" };
    let mut params = Vec::new();
    if targets.library_recommended {
        params.push(("promotedToRecommended", flag));
    }
    if targets.home {
        params.push(("promotedToOwnHome", flag));
    }
    if targets.shared_home {
        params.push(("promotedToSharedHome", flag));
    }
    params
}

fn status_error(status: StatusCode, path: &str) -> MediaError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MediaError::Auth(format!("{} returned {}", path, status))
        }
        StatusCode::NOT_FOUND => MediaError::NotFound(path.to_string()),
        _ => MediaError::Protocol(format!("{} returned {}", path, status)),
    }
}

fn transport_error(e: reqwest::Error) -> MediaError {
    if e.is_decode() {
        MediaError::Protocol(e.to_string())
    } else {
        MediaError::Network(e.to_string())
    }
}

/// Plex Media Server client.
pub struct PlexClient {
    client: Client,
    base_url: String,
    token: String,
    /// Library title to section key.
    sections: RwLock<HashMap<String, String>>,
}

impl PlexClient {
    pub fn new(config: &MediaServerConfig) -> Result<Self, MediaError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| MediaError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            sections: RwLock::new(HashMap::new()),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, MediaError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .header(TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, path));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MediaError> {
        let envelope: Envelope<T> = self
            .send(Method::GET, path, &[])
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(envelope.container)
    }

    /// Section key for the library titled `library`, refreshing the cache on a miss.
    async fn section_key(&self, library: &str) -> Result<String, MediaError> {
        if let Some(key) = self.sections.read().await.get(library) {
            return Ok(key.clone());
        }
        self.list_libraries().await?;
        self.sections
            .read()
            .await
            .get(library)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(format!("library '{}'", library)))
    }

    async fn set_visibility(
        &self,
        collection: &Collection,
        targets: &PinningTargets,
        promoted: bool,
    ) -> Result<(), MediaError> {
        let params = visibility_params(targets, promoted);
        if params.is_empty() {
            return Ok(());
        }

        let section = self.section_key(&collection.library).await?;
        let identifier = hub_identifier(&section, &collection.rating_key);
        let manage_path = format!("/hubs/sections/{}/manage", section);
        let hub_path = format!("{}/{}", manage_path, identifier);

        match self.send(Method::PUT, &hub_path, &params).await {
            Err(MediaError::NotFound(_)) if promoted => {
                // No managed hub yet: create it, then set the flags.
                self.send(
                    Method::POST,
                    &manage_path,
                    &[("metadataItemId", collection.rating_key.as_str())],
                )
                .await?;
                self.send(Method::PUT, &hub_path, &params).await?;
            }
            // Demoting a hub that was never created is a no-op.
            Err(MediaError::NotFound(_)) => {}
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        debug!(
            library = %collection.library,
            collection = %collection.title,
            promoted,
            "hub visibility updated"
        );
        Ok(())
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn list_libraries(&self) -> Result<Vec<Library>, MediaError> {
        let container: SectionsContainer = self.get_json("/library/sections").await?;
        let libraries: Vec<Library> = container
            .directories
            .into_iter()
            .map(|d| Library {
                key: d.key,
                title: d.title,
            })
            .collect();

        let mut sections = self.sections.write().await;
        sections.clear();
        for library in &libraries {
            sections.insert(library.title.clone(), library.key.clone());
        }
        Ok(libraries)
    }

    async fn list_collections(
        &self,
        library: &str,
        targets: &PinningTargets,
    ) -> Result<Vec<Collection>, MediaError> {
        let section = self.section_key(library).await?;
        let collections: CollectionsContainer = self
            .get_json(&format!("/library/sections/{}/collections", section))
            .await?;
        let hubs: ManagedHubsContainer = self
            .get_json(&format!("/hubs/sections/{}/manage", section))
            .await?;

        Ok(build_collections(library, &section, collections, hubs, targets))
    }

    async fn pin(&self, collection: &Collection, targets: &PinningTargets) -> Result<(), MediaError> {
        self.set_visibility(collection, targets, true).await
    }

    async fn unpin(&self, collection: &Collection, targets: &PinningTargets) -> Result<(), MediaError> {
        self.set_visibility(collection, targets, false).await
    }
}

fn build_collections(
    library: &str,
    section: &str,
    collections: CollectionsContainer,
    hubs: ManagedHubsContainer,
    targets: &PinningTargets,
) -> Vec<Collection> {
    let promoted: HashMap<String, bool> = hubs
        .hubs
        .into_iter()
        .map(|h| {
            let promoted = h.is_promoted(targets);
            (h.identifier, promoted)
        })
        .collect();

    collections
        .metadata
        .into_iter()
        .map(|c| {
            let pinned = promoted
                .get(&hub_identifier(section, &c.rating_key))
                .copied()
                .unwrap_or(false);
            Collection {
                rating_key: c.rating_key,
                title: c.title,
                library: library.to_string(),
                item_count: c.child_count,
                pinned,
                last_pinned: None,
            }
        })
        .collect()
}
