//! Figma Preview Server
//!
//! HTTP server that sits between the browser-side preview tooling and the
//! Figma plugin: it stores uploads, pushes scan commands to the plugin over
//! a WebSocket and cleans up directories for assets that no longer exist.

pub mod control;
pub mod error;
pub mod idle;
pub mod protocol;
pub mod registry;
pub mod socket;
pub mod upload;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Multipart, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use figpreview_core::{AppConfig, DataRoots, MtimeCache};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use control::ControlApi;
pub use error::{ControlError, RequestError};
pub use idle::{IdleBarrier, IdleWait};
pub use protocol::{ApiStatus, PluginCommand, PluginSignal};
pub use registry::{BroadcastError, ConnectionId, ConnectionRegistry, PluginSink, SinkError};

/// Uploads carry rendered previews; allow well beyond axum's 2MB default
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// `kind` value of a `/process` request listing the live assets
pub const KIND_ASSETS_CHANGE: &str = "assetsChange";

/// Shared application state
pub struct AppState {
    pub roots: DataRoots,
    pub registry: Arc<ConnectionRegistry>,
    pub mtimes: Arc<MtimeCache>,
    pub control: ControlApi,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Arc<Self> {
        let roots = config.roots();
        let registry = Arc::new(ConnectionRegistry::new());
        let mtimes = Arc::new(MtimeCache::new());
        let control = ControlApi::new(
            registry.clone(),
            mtimes.clone(),
            roots.clone(),
            config.idle_timeout(),
        );
        Arc::new(Self {
            roots,
            registry,
            mtimes,
            control,
        })
    }
}

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Plugin connection
        .route("/ws", get(handle_ws))
        // Control surface
        .route("/api", get(handle_api_query).post(handle_api_form))
        .route("/upload", post(handle_upload))
        .route("/process", post(handle_process))
        // Health check
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // The uploader runs in a browser on another origin
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len().await,
    }))
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| socket::handle_connection(socket, registry))
}

/// `/api` form fields
#[derive(Debug, Default, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub force: Option<String>,
}

impl ApiRequest {
    fn force(&self) -> bool {
        self.force.as_deref() == Some("1")
    }

    /// Fill fields missing here from `fallback`
    fn or(self, fallback: ApiRequest) -> ApiRequest {
        ApiRequest {
            action: if self.action.is_empty() {
                fallback.action
            } else {
                self.action
            },
            force: self.force.or(fallback.force),
        }
    }
}

async fn handle_api_query(
    State(state): State<Arc<AppState>>,
    Query(req): Query<ApiRequest>,
) -> Json<ApiStatus> {
    respond(run_api(&state, req).await)
}

/// POST accepts the fields in the query string, a urlencoded body or both;
/// body fields win
async fn handle_api_form(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApiRequest>,
    form: Option<Form<ApiRequest>>,
) -> Json<ApiStatus> {
    let req = match form {
        Some(Form(body)) => body.or(query),
        None => query,
    };
    respond(run_api(&state, req).await)
}

async fn run_api(state: &AppState, req: ApiRequest) -> Result<(), RequestError> {
    tracing::info!("Running API handler: {}", req.action);
    match req.action.as_str() {
        "scanAssets" => state.control.scan_assets(req.force()).await?,
        "scanLocalizationFiles" => {
            state
                .control
                .scan_localization_files(false, req.force())
                .await?;
        }
        _ => return Err(RequestError::UnsupportedAction),
    }
    Ok(())
}

/// Store an uploaded file beneath the data root
async fn handle_upload(State(state): State<Arc<AppState>>, multipart: Multipart) -> Json<ApiStatus> {
    respond(store_uploaded_file(&state, multipart).await)
}

async fn store_uploaded_file(state: &AppState, multipart: Multipart) -> Result<(), RequestError> {
    let mut fields = upload::read_form(multipart).await?;
    let file = upload::take_field(&mut fields, "file")?;
    let filename = upload::take_field(&mut fields, "filename")?;
    let filename = String::from_utf8_lossy(&filename);
    tracing::info!("Got file: {}", filename);

    upload::store_upload(&state.roots, &state.mtimes, &filename, &file).await?;
    Ok(())
}

/// Handle a JSON notification from the browser side
async fn handle_process(State(state): State<Arc<AppState>>, multipart: Multipart) -> Json<ApiStatus> {
    respond(process_notification(&state, multipart).await)
}

async fn process_notification(state: &AppState, multipart: Multipart) -> Result<(), RequestError> {
    let mut fields = upload::read_form(multipart).await?;
    let kind = upload::take_field(&mut fields, "kind")?;
    let kind = String::from_utf8_lossy(&kind);
    tracing::info!("JSON kind: {}", kind);

    if kind != KIND_ASSETS_CHANGE {
        return Err(RequestError::UnsupportedKind);
    }

    let file = upload::take_field(&mut fields, "file")?;
    let assets: Vec<String> = serde_json::from_slice(&file).map_err(RequestError::InvalidAssets)?;
    state.control.process_assets_change(&assets).await?;
    Ok(())
}

fn respond(result: Result<(), RequestError>) -> Json<ApiStatus> {
    if let Err(e) = &result {
        tracing::warn!("Request failed: {}", e);
    }
    Json(ApiStatus::from_result(result))
}

/// Start the server
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(&config);
    state.roots.ensure_exist().with_context(|| {
        format!(
            "Failed to create data directories under {}",
            config.data_root.display()
        )
    })?;

    match state.control.scan_localization_files(true, false).await {
        Ok(_) if state.mtimes.is_empty() => tracing::info!(
            "No localization files under {}",
            state.roots.localization.display()
        ),
        Ok(_) => tracing::info!("Tracking {} localization files", state.mtimes.len()),
        Err(e) => tracing::warn!("Initial localization scan failed: {}", e),
    }

    let router = create_router(state);

    let addr = config.bind_address();
    tracing::info!("Listening on {}", addr);
    tracing::info!("Root folder: {}", config.data_root.display());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router).await?;

    Ok(())
}
