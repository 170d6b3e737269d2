//! Settings editing endpoints
//!
//! Every write re-reads `config.json` first, so edits made by hand since the
//! last load are kept, then goes through [`ConfigStore::update`].

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{
    AppliesTo, PinnedCollection, SeasonBlock, SeasonBlockDef, SeasonTarget, Settings, TimeBlock,
    TimeBlockDef,
};
use crate::holidays::{holiday_keywords, title_matches};
use crate::server::{ApiError, AppState};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Name-only request body used by the delete endpoints.
#[derive(Debug, Deserialize)]
pub struct NameKey {
    pub name: String,
}

fn invalid(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

fn required(value: &str, what: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

/// Current settings after picking up any edit on disk.
async fn fresh_settings(app: &AppState) -> Settings {
    app.settings.reload().await;
    app.settings.snapshot().await
}

/// Reload, then apply `f` and persist.
async fn edit<R>(app: &AppState, f: impl FnOnce(&mut Settings) -> R) -> Result<R, ApiError> {
    app.settings.reload().await;
    Ok(app.settings.update(f).await?)
}

async fn get_settings(State(app): State<AppState>) -> Json<Settings> {
    Json(fresh_settings(&app).await)
}

async fn post_settings(
    State(app): State<AppState>,
    Json(settings): Json<Settings>,
) -> ApiResult<Value> {
    app.settings.replace(settings).await?;
    info!("settings replaced");
    Ok(Json(json!({ "status": "saved" })))
}

async fn post_time_block_add(
    State(app): State<AppState>,
    Json(def): Json<TimeBlockDef>,
) -> ApiResult<Value> {
    required(&def.name, "block name")?;
    let block = TimeBlock::try_from(def).map_err(invalid)?;
    let name = block.name.clone();
    edit(&app, |s| s.time_blocks.push(block)).await?;
    info!(block = %name, "time block added");
    Ok(Json(json!({ "status": "added" })))
}

async fn post_time_block_delete(
    State(app): State<AppState>,
    Json(key): Json<NameKey>,
) -> ApiResult<Value> {
    let removed = edit(&app, |s| {
        let before = s.time_blocks.len();
        s.time_blocks.retain(|b| b.name != key.name);
        before - s.time_blocks.len()
    })
    .await?;
    if removed == 0 {
        return Err(ApiError::NotFound(format!("no time block named '{}'", key.name)));
    }
    Ok(Json(json!({ "status": "deleted", "removed": removed })))
}

/// Drop every season block named `name` that drives `kind`.
fn remove_season_blocks(settings: &mut Settings, name: &str, kind: AppliesTo) -> usize {
    let before = settings.seasonal_blocks.len();
    settings
        .seasonal_blocks
        .retain(|b| !(b.name == name && b.applies_to() == kind));
    before - settings.seasonal_blocks.len()
}

async fn post_season_block_add(
    State(app): State<AppState>,
    Json(def): Json<SeasonBlockDef>,
) -> ApiResult<Value> {
    required(&def.name, "block name")?;
    let block = SeasonBlock::try_from(def).map_err(invalid)?;
    let name = block.name.clone();
    edit(&app, |s| s.seasonal_blocks.push(block)).await?;
    info!(block = %name, "season block added");
    Ok(Json(json!({ "status": "added" })))
}

async fn post_season_block_delete(
    State(app): State<AppState>,
    Json(key): Json<NameKey>,
) -> ApiResult<Value> {
    let removed = edit(&app, |s| remove_season_blocks(s, &key.name, AppliesTo::Pinning)).await?;
    if removed == 0 {
        return Err(ApiError::NotFound(format!("no season block named '{}'", key.name)));
    }
    Ok(Json(json!({ "status": "deleted", "removed": removed })))
}

/// One holiday applied to several libraries at once.
#[derive(Debug, Deserialize)]
pub struct SeasonDefaultsRequest {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    /// Library title to the collections to pin there.
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<String>>,
}

async fn post_season_block_defaults(
    State(app): State<AppState>,
    Json(request): Json<SeasonDefaultsRequest>,
) -> ApiResult<Value> {
    let name = required(&request.name, "block name")?;
    let libraries = fresh_settings(&app).await.libraries;

    let mut blocks = Vec::new();
    for (library, collections) in &request.collections {
        if !libraries.contains(library) {
            warn!(library = %library, "skipping library that is not configured");
            continue;
        }
        for collection in collections.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            let def = SeasonBlockDef {
                name: name.clone(),
                start_date: request.start_date.clone(),
                end_date: request.end_date.clone(),
                applies_to: AppliesTo::Pinning,
                libraries: vec![library.clone()],
                collection: Some(collection.to_string()),
                filename: None,
            };
            blocks.push(SeasonBlock::try_from(def).map_err(invalid)?);
        }
    }
    if blocks.is_empty() {
        return Err(ApiError::BadRequest(
            "no collections given for a configured library".to_string(),
        ));
    }

    let added = blocks.len();
    edit(&app, |s| s.seasonal_blocks.extend(blocks)).await?;
    info!(block = %name, added, "default season blocks added");
    Ok(Json(json!({ "status": "added", "added": added })))
}

#[derive(Debug, Deserialize)]
pub struct HolidayQuery {
    pub holiday: String,
}

/// Collections whose titles mention the holiday, per configured library.
async fn get_collection_suggestions(
    State(app): State<AppState>,
    Query(query): Query<HolidayQuery>,
) -> Json<BTreeMap<String, Vec<String>>> {
    let settings = fresh_settings(&app).await;
    let keywords = holiday_keywords(&query.holiday);

    let mut suggestions = BTreeMap::new();
    for library in &settings.libraries {
        let titles = match app
            .media
            .list_collections(library, &settings.pinning_targets)
            .await
        {
            Ok(collections) => collections
                .into_iter()
                .filter(|c| title_matches(&c.title, &keywords))
                .map(|c| c.title)
                .collect(),
            Err(e) => {
                warn!(library = %library, error = %e, "could not list collections for suggestions");
                Vec::new()
            }
        };
        suggestions.insert(library.clone(), titles);
    }
    Json(suggestions)
}

async fn post_pinned_collection_add(
    State(app): State<AppState>,
    Json(request): Json<PinnedCollection>,
) -> ApiResult<Value> {
    let title = required(&request.title, "collection title")?;
    let libraries: Vec<String> = request
        .libraries
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    let updated = edit(&app, |s| {
        match s.pinned_collections.iter_mut().find(|p| p.title == title) {
            Some(existing) => {
                existing.libraries = libraries;
                true
            }
            None => {
                s.pinned_collections.push(PinnedCollection {
                    title: title.clone(),
                    libraries,
                });
                false
            }
        }
    })
    .await?;
    info!(collection = %title, updated, "always-pinned collection saved");
    Ok(Json(json!({ "status": if updated { "updated" } else { "added" } })))
}

#[derive(Debug, Deserialize)]
pub struct TitleKey {
    pub title: String,
}

async fn post_pinned_collection_delete(
    State(app): State<AppState>,
    Json(key): Json<TitleKey>,
) -> ApiResult<Value> {
    let removed = edit(&app, |s| {
        let before = s.pinned_collections.len();
        s.pinned_collections.retain(|p| p.title != key.title);
        before != s.pinned_collections.len()
    })
    .await?;
    if !removed {
        return Err(ApiError::NotFound(format!("'{}' is not always pinned", key.title)));
    }
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct DefaultPrerollRequest {
    #[serde(default)]
    pub default_preroll_filename: Option<String>,
}

async fn post_preroll_default(
    State(app): State<AppState>,
    Json(request): Json<DefaultPrerollRequest>,
) -> ApiResult<Value> {
    let filename = request
        .default_preroll_filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    edit(&app, |s| s.default_preroll_filename = filename.clone()).await?;
    info!(file = ?filename, "default pre-roll set");
    Ok(Json(json!({ "status": "saved", "default_preroll_filename": filename })))
}

/// A pre-roll season block as the pre-roll form submits it.
#[derive(Debug, Serialize, Deserialize)]
pub struct PrerollBlockRequest {
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub filename: String,
}

async fn post_preroll_block_add(
    State(app): State<AppState>,
    Json(request): Json<PrerollBlockRequest>,
) -> ApiResult<Value> {
    let name = required(&request.name, "block name")?;
    let def = SeasonBlockDef {
        name,
        start_date: request.start_date,
        end_date: request.end_date,
        applies_to: AppliesTo::Preroll,
        libraries: Vec::new(),
        collection: None,
        filename: Some(request.filename),
    };
    let block = SeasonBlock::try_from(def).map_err(invalid)?;
    if let SeasonTarget::Preroll { filename } = &block.target {
        info!(block = %block.name, file = %filename, "pre-roll block added");
    }
    edit(&app, |s| s.seasonal_blocks.push(block)).await?;
    Ok(Json(json!({ "status": "added" })))
}

async fn post_preroll_block_delete(
    State(app): State<AppState>,
    Json(key): Json<NameKey>,
) -> ApiResult<Value> {
    let removed = edit(&app, |s| remove_season_blocks(s, &key.name, AppliesTo::Preroll)).await?;
    if removed == 0 {
        return Err(ApiError::NotFound(format!("no pre-roll block named '{}'", key.name)));
    }
    Ok(Json(json!({ "status": "deleted", "removed": removed })))
}

/// Routes that edit the settings document.
pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).post(post_settings))
        .route("/settings/time-blocks/add", post(post_time_block_add))
        .route("/settings/time-blocks/delete", post(post_time_block_delete))
        .route("/settings/seasonal-blocks/add", post(post_season_block_add))
        .route("/settings/seasonal-blocks/delete", post(post_season_block_delete))
        .route(
            "/settings/seasonal-blocks/add-defaults",
            post(post_season_block_defaults),
        )
        .route(
            "/settings/seasonal-blocks/suggest-collections",
            get(get_collection_suggestions),
        )
        .route("/settings/pinned-collections/add", post(post_pinned_collection_add))
        .route(
            "/settings/pinned-collections/delete",
            post(post_pinned_collection_delete),
        )
        .route("/preroll/default", post(post_preroll_default))
        .route("/preroll/add", post(post_preroll_block_add))
        .route("/preroll/delete", post(post_preroll_block_delete))
}
