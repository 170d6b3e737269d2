//! HTTP control surface
//!
//! JSON endpoints for run-state control, the dashboard, the exclusion ledger,
//! the exemption list, pre-roll switching and holiday suggestions. Settings
//! editing lives in [`crate::settings_api`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::dashboard::{build_dashboard, DashboardData, DashboardInputs};
use crate::exemptions::{ExemptionEntry, ExemptionList};
use crate::holidays::{default_season_ranges, HolidayRange};
use crate::ledger::ExclusionLedger;
use crate::config::PinningTargets;
use crate::media::MediaServer;
use crate::pinning::PinningEngine;
use crate::preroll::{PrerollEngine, PrerollError, PrerollOutcome};
use crate::scheduler::{RunStatus, Scheduler, SchedulerError};
use crate::store::{ConfigStore, JsonStore, StoreError};

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Error body returned by every failing handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Handler error mapped onto a status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "CONFLICT", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", m),
        };
        let body = ErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::TaskFailed(_) => ApiError::Internal(e.to_string()),
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning | SchedulerError::Busy => {
                ApiError::Conflict(e.to_string())
            }
        }
    }
}

impl From<PrerollError> for ApiError {
    fn from(e: PrerollError) -> Self {
        match e {
            PrerollError::FolderNotSet | PrerollError::NoPrerollConfigured => {
                ApiError::BadRequest(e.to_string())
            }
            PrerollError::FolderMissing(_) | PrerollError::SourceMissing(_) => {
                ApiError::NotFound(e.to_string())
            }
            PrerollError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub settings: Arc<ConfigStore>,
    pub ledger: Arc<JsonStore<ExclusionLedger>>,
    pub exemptions: Arc<JsonStore<ExemptionList>>,
    pub pinning: Arc<PinningEngine>,
    pub preroll: Arc<PrerollEngine>,
    pub media: Arc<dyn MediaServer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStateView {
    pub state: RunStatus,
    pub running: bool,
    pub schedule_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

async fn get_run_state(State(app): State<AppState>) -> Json<RunStateView> {
    let record = app.scheduler.snapshot().await;
    Json(RunStateView {
        state: record.state,
        running: matches!(record.state, RunStatus::Running | RunStatus::OneOff),
        schedule_active: record.schedule_active,
        last_run: record.last_run,
        next_run: record.next_run,
    })
}

async fn post_start(State(app): State<AppState>) -> ApiResult<Value> {
    let next_run = app.scheduler.start().await?;
    Ok(Json(json!({ "status": "started", "next_run": next_run })))
}

async fn post_stop(State(app): State<AppState>) -> ApiResult<Value> {
    app.scheduler.stop().await?;
    Ok(Json(json!({ "status": "stopped" })))
}

/// Unpin everything in the configured libraries, outside any cycle.
async fn post_clear_pins(State(app): State<AppState>) -> ApiResult<Value> {
    app.settings.reload().await;
    let pinning = Arc::clone(&app.pinning);
    let result = app
        .scheduler
        .run_exclusive(async move { pinning.clear_pins().await })
        .await?;
    let unpinned: Vec<String> = result.unpinned.iter().map(|c| c.label()).collect();
    let errors: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
    Ok(Json(json!({
        "status": if errors.is_empty() { "success" } else { "error" },
        "unpinned": unpinned,
        "errors": errors,
    })))
}

async fn post_run_once(State(app): State<AppState>) -> ApiResult<Value> {
    let report = app.scheduler.run_once().await?;
    Ok(Json(json!({
        "status": "success",
        "pinned": report.pass.pinned_labels(),
        "errors": report.error_messages(),
        "preroll": report.preroll,
    })))
}

#[derive(Debug, Clone, Serialize)]
pub struct PrerollListing {
    pub current: Option<String>,
    pub files: Vec<String>,
}

async fn get_preroll(State(app): State<AppState>) -> ApiResult<PrerollListing> {
    let files = app.preroll.list_preroll_files().await?;
    let current = app.preroll.current().await;
    Ok(Json(PrerollListing { current, files }))
}

async fn post_preroll_run(State(app): State<AppState>) -> ApiResult<PrerollOutcome> {
    let outcome = app.preroll.resolve_and_apply(Local::now()).await?;
    Ok(Json(outcome))
}

/// Sum of collections across configured libraries, `None` if any listing fails.
async fn count_collections(
    media: &dyn MediaServer,
    libraries: &[String],
    targets: &PinningTargets,
) -> Option<usize> {
    let mut total = 0;
    for library in libraries {
        match media.list_collections(library, targets).await {
            Ok(collections) => total += collections.len(),
            Err(e) => {
                warn!(library = %library, error = %e, "collection count unavailable");
                return None;
            }
        }
    }
    Some(total)
}

async fn get_dashboard(State(app): State<AppState>) -> Json<DashboardData> {
    app.settings.reload().await;
    let settings = app.settings.snapshot().await;
    let ledger = app.ledger.snapshot().await;
    let exemptions = app.exemptions.snapshot().await;
    let run_state = app.scheduler.snapshot().await;
    let total_collections = count_collections(
        app.media.as_ref(),
        &settings.libraries,
        &settings.pinning_targets,
    )
    .await;
    let current_roll = app.preroll.current().await;

    Json(build_dashboard(
        DashboardInputs {
            settings: &settings,
            ledger: &ledger,
            exemptions: &exemptions,
            run_state: &run_state,
            total_collections,
            current_roll,
        },
        Local::now(),
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct ExclusionView {
    pub library: String,
    pub collection: String,
    pub pinned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

async fn get_exclusions(State(app): State<AppState>) -> Json<Vec<ExclusionView>> {
    let exclusion_days = app.settings.read(|s| s.exclusion_days).await;
    let views = app
        .ledger
        .read(|ledger| {
            ledger
                .entries()
                .iter()
                .map(|e| ExclusionView {
                    library: e.library.clone(),
                    collection: e.collection.clone(),
                    pinned_at: e.pinned_at,
                    expires_at: e.expires_at(exclusion_days),
                })
                .collect()
        })
        .await;
    Json(views)
}

#[derive(Debug, Deserialize)]
pub struct ExclusionKey {
    pub library: String,
    pub collection: String,
}

async fn post_exclusion_delete(
    State(app): State<AppState>,
    Json(key): Json<ExclusionKey>,
) -> ApiResult<Value> {
    let removed = app
        .ledger
        .update(|ledger| ledger.remove(&key.library, &key.collection))
        .await?;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "no exclusion for '{}' in '{}'",
            key.collection, key.library
        )));
    }
    info!(library = %key.library, collection = %key.collection, "exclusion removed");
    Ok(Json(json!({ "status": "deleted" })))
}

async fn post_exclusion_reset(State(app): State<AppState>) -> ApiResult<Value> {
    let cleared = app.ledger.update(|ledger| ledger.clear()).await?;
    info!(cleared, "exclusion ledger reset");
    Ok(Json(json!({ "status": "reset", "cleared": cleared })))
}

async fn get_exemptions(State(app): State<AppState>) -> Json<Vec<ExemptionEntry>> {
    Json(app.exemptions.read(|list| list.entries().to_vec()).await)
}

#[derive(Debug, Deserialize)]
pub struct ExemptionRequest {
    pub collection: String,
    #[serde(default)]
    pub library: Option<String>,
}

impl ExemptionRequest {
    fn normalized(&self) -> Result<(String, Option<String>), ApiError> {
        let collection = self.collection.trim();
        if collection.is_empty() {
            return Err(ApiError::BadRequest("collection title is required".to_string()));
        }
        let library = self
            .library
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        Ok((collection.to_string(), library))
    }
}

async fn post_exemption_add(
    State(app): State<AppState>,
    Json(request): Json<ExemptionRequest>,
) -> ApiResult<Value> {
    let (collection, library) = request.normalized()?;
    let entry = ExemptionEntry::new(collection, library);
    let added = app.exemptions.update(|list| list.add(entry)).await?;
    Ok(Json(json!({ "status": if added { "added" } else { "exists" } })))
}

async fn post_exemption_delete(
    State(app): State<AppState>,
    Json(request): Json<ExemptionRequest>,
) -> ApiResult<Value> {
    let (collection, library) = request.normalized()?;
    let removed = app
        .exemptions
        .update(|list| list.remove(&collection, library.as_deref()))
        .await?;
    if !removed {
        return Err(ApiError::NotFound(format!("'{}' is not exempt", collection)));
    }
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

async fn get_seasonal_defaults(Query(query): Query<YearQuery>) -> ApiResult<Vec<HolidayRange>> {
    let year = query.year.unwrap_or_else(|| Local::now().year());
    if !(1583..=9999).contains(&year) {
        return Err(ApiError::BadRequest(format!("year out of range: {}", year)));
    }
    Ok(Json(default_season_ranges(year)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/run_state", get(get_run_state))
        .route("/dashboard_data", get(get_dashboard))
        .route("/start", post(post_start))
        .route("/stop", post(post_stop))
        .route("/run-once", post(post_run_once))
        .route("/clear_pins", post(post_clear_pins))
        .route("/preroll", get(get_preroll))
        .route("/preroll/run", post(post_preroll_run))
        .route("/exclusions", get(get_exclusions))
        .route("/exclusions/delete", post(post_exclusion_delete))
        .route("/exclusions/reset", post(post_exclusion_reset))
        .route("/exemptions", get(get_exemptions))
        .route("/exemptions/add", post(post_exemption_add))
        .route("/exemptions/delete", post(post_exemption_delete))
        .route("/seasonal/defaults", get(get_seasonal_defaults))
        .merge(crate::settings_api::routes())
        .with_state(state)
}

/// Serve the router on `addr` until ctrl-c.
pub async fn run_server(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Router fixtures shared by the route tests.

    use super::*;
    use crate::config::Settings;
    use crate::cycle::Cycle;
    use crate::media::testing::FakeMediaServer;
    use crate::store::{EXEMPTIONS_FILE, LEDGER_FILE, RUN_STATE_FILE, SETTINGS_FILE};
    use axum::body::Body;
    use axum::http::{header, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    pub(crate) async fn app_state(dir: &TempDir, media: FakeMediaServer) -> AppState {
        let mut settings = Settings::default();
        settings.libraries = vec!["Movies".to_string()];
        let settings_store = Arc::new(ConfigStore::open_in(dir.path(), SETTINGS_FILE));
        settings_store.replace(settings).await.unwrap();

        let media: Arc<dyn MediaServer> = Arc::new(media);
        let ledger = Arc::new(JsonStore::open_in(dir.path(), LEDGER_FILE));
        let exemptions = Arc::new(JsonStore::open_in(dir.path(), EXEMPTIONS_FILE));
        let pinning = Arc::new(PinningEngine::new(
            Arc::clone(&media),
            Arc::clone(&settings_store),
            Arc::clone(&ledger),
            Arc::clone(&exemptions),
            2,
        ));
        let preroll = Arc::new(PrerollEngine::new(Arc::clone(&settings_store)));
        let cycle = Arc::new(Cycle::new(
            Arc::clone(&settings_store),
            Arc::clone(&pinning),
            Arc::clone(&preroll),
        ));
        let scheduler = Scheduler::new(cycle, Arc::new(JsonStore::open_in(dir.path(), RUN_STATE_FILE)));

        AppState {
            scheduler,
            settings: settings_store,
            ledger,
            exemptions,
            pinning,
            preroll,
            media,
        }
    }

    pub(crate) async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{app_state, send};
    use super::*;
    use crate::media::testing::FakeMediaServer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_state_starts_stopped() {
        let dir = TempDir::new().unwrap();
        let app = create_router(app_state(&dir, FakeMediaServer::new()).await);

        let (status, body) = send(app, "GET", "/run_state", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "stopped");
        assert_eq!(body["running"], false);
        assert!(body["next_run"].is_null());
    }

    #[tokio::test]
    async fn test_start_then_start_again_conflicts() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir, FakeMediaServer::new()).await;
        let app = create_router(state.clone());

        let (status, body) = send(app.clone(), "POST", "/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "started");

        let (status, body) = send(app.clone(), "POST", "/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");

        let (status, _) = send(app.clone(), "POST", "/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app, "POST", "/stop", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_run_once_pins_and_records_exclusion() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        let app = create_router(app_state(&dir, media).await);

        let (status, body) = send(app.clone(), "POST", "/run-once", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["pinned"], json!(["Noir (Movies)"]));

        let (_, exclusions) = send(app.clone(), "GET", "/exclusions", None).await;
        assert_eq!(exclusions.as_array().unwrap().len(), 1);
        assert_eq!(exclusions[0]["collection"], "Noir");

        let (_, dashboard) = send(app, "GET", "/dashboard_data", None).await;
        assert_eq!(dashboard["total_collections"], 1);
        assert_eq!(dashboard["pinned_today"], 1);
        assert_eq!(dashboard["exclusions_active"], 1);
    }

    #[tokio::test]
    async fn test_exclusion_delete_and_reset() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir, FakeMediaServer::new()).await;
        state
            .ledger
            .update(|l| {
                l.record("Movies", "Noir", Utc::now());
                l.record("Movies", "Heist", Utc::now());
            })
            .await
            .unwrap();
        let app = create_router(state.clone());

        let key = json!({ "library": "Movies", "collection": "Noir" });
        let (status, _) = send(app.clone(), "POST", "/exclusions/delete", Some(key.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app.clone(), "POST", "/exclusions/delete", Some(key)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(app, "POST", "/exclusions/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], 1);
        assert!(state.ledger.read(|l| l.is_empty()).await);
    }

    #[tokio::test]
    async fn test_exemption_add_list_delete() {
        let dir = TempDir::new().unwrap();
        let app = create_router(app_state(&dir, FakeMediaServer::new()).await);

        let (status, body) = send(
            app.clone(),
            "POST",
            "/exemptions/add",
            Some(json!({ "collection": "  Kids  ", "library": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "added");

        let (_, body) = send(
            app.clone(),
            "POST",
            "/exemptions/add",
            Some(json!({ "collection": "Kids" })),
        )
        .await;
        assert_eq!(body["status"], "exists");

        let (_, list) = send(app.clone(), "GET", "/exemptions", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = send(
            app.clone(),
            "POST",
            "/exemptions/add",
            Some(json!({ "collection": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            "POST",
            "/exemptions/delete",
            Some(json!({ "collection": "Kids" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, list) = send(app, "GET", "/exemptions", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preroll_run_without_folder_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let app = create_router(app_state(&dir, FakeMediaServer::new()).await);

        let (status, body) = send(app, "POST", "/preroll/run", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_preroll_listing_and_switch() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("prerolls");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("default.mp4"), b"d").unwrap();
        std::fs::write(folder.join("spooky.mp4"), b"s").unwrap();
        let state = app_state(&dir, FakeMediaServer::new()).await;
        state
            .settings
            .update(|s| {
                s.pre_roll_folder = Some(folder.clone());
                s.default_preroll_filename = Some("default.mp4".to_string());
            })
            .await
            .unwrap();
        let app = create_router(state);

        let (status, body) = send(app.clone(), "GET", "/preroll", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], json!(["default.mp4", "spooky.mp4"]));
        assert!(body["current"].is_null());

        let (status, body) = send(app.clone(), "POST", "/preroll/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied_file"], "default.mp4");
        assert_eq!(body["fallback_used"], true);

        let (_, body) = send(app, "GET", "/preroll", None).await;
        assert_eq!(body["current"], "default.mp4");
        assert_eq!(body["files"], json!(["spooky.mp4"]));
    }

    #[tokio::test]
    async fn test_seasonal_defaults_for_year() {
        let dir = TempDir::new().unwrap();
        let app = create_router(app_state(&dir, FakeMediaServer::new()).await);

        let (status, body) = send(app.clone(), "GET", "/seasonal/defaults?year=2024", None).await;
        assert_eq!(status, StatusCode::OK);
        let ranges = body.as_array().unwrap();
        assert!(!ranges.is_empty());
        assert!(ranges.iter().all(|r| r["start_date"].is_string()));

        let (status, _) = send(app, "GET", "/seasonal/defaults?year=99", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dashboard_without_media_server_reports_unknown_total() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.fail_library("Movies");
        let app = create_router(app_state(&dir, media).await);

        let (status, body) = send(app, "GET", "/dashboard_data", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["total_collections"].is_null());
        assert_eq!(body["state"], "stopped");
    }

    #[tokio::test]
    async fn test_exclusions_with_huge_cooldown() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir, FakeMediaServer::new()).await;
        state
            .settings
            .update(|s| s.exclusion_days = 100_000_000)
            .await
            .unwrap();
        state
            .ledger
            .update(|l| l.record("Movies", "Noir", Utc::now()))
            .await
            .unwrap();
        let app = create_router(state);

        let (status, body) = send(app.clone(), "GET", "/exclusions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["collection"], "Noir");

        let (status, body) = send(app, "GET", "/dashboard_data", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exclusions_active"], 1);
    }

    #[tokio::test]
    async fn test_clear_pins_unpins_configured_libraries() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, true);
        media.add_collection("Movies", "Heist", 5, false);
        media.add_collection("TV Shows", "Sitcoms", 5, true);
        let app = create_router(app_state(&dir, media).await);

        let (status, body) = send(app.clone(), "POST", "/clear_pins", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["unpinned"], json!(["Noir (Movies)"]));

        let (_, dashboard) = send(app, "GET", "/dashboard_data", None).await;
        assert_eq!(dashboard["state"], "stopped");
    }

    #[tokio::test]
    async fn test_dashboard_reads_settings_edited_on_disk() {
        let dir = TempDir::new().unwrap();
        let media = FakeMediaServer::new();
        media.add_collection("Movies", "Noir", 5, false);
        media.add_collection("TV Shows", "Sitcoms", 5, false);
        let app = create_router(app_state(&dir, media).await);
        std::fs::write(
            dir.path().join(crate::store::SETTINGS_FILE),
            r#"{"libraries": ["Movies", "TV Shows"]}"#,
        )
        .unwrap();

        let (status, body) = send(app, "GET", "/dashboard_data", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_collections"], 2);
    }
}
