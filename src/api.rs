use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::spawn;
use tracing::{error, info, warn};

use crate::{
    app_state::{lock, ActiveView, AppState},
    catalog,
    config_sync::{ConfigError, ConfigView},
    models::{
        ConfigDraft, FileTreeNode, HealthReport, ModelInfo, SearchQuery, VectorDbInfo,
        DEFAULT_SEARCH_THRESHOLD, DEFAULT_SEARCH_TOP_K, MAX_TOP_K,
    },
    search::{SearchError, SearchView},
    stats::StatsView,
    transport::NetworkError,
    upload::{collect_files, FileHandle, UploadError, UploadsView},
};

/// Tamaño máximo de una petición de ficheros soltados en el navegador.
const MAX_DROP_BYTES: usize = 256 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);

// --- Payloads ---

#[derive(Deserialize)]
pub struct ViewPayload {
    view: ActiveView,
}

#[derive(Deserialize)]
pub struct ListDirPayload {
    path: String,
}

#[derive(Deserialize)]
pub struct UploadPathsPayload {
    paths: Vec<String>,
}

/// Consulta por texto (`query`) o por un fichero indexado (`file_id`).
#[derive(Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    query: String,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default = "default_top_k")]
    top_k: u32,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_top_k() -> u32 {
    DEFAULT_SEARCH_TOP_K
}

fn default_threshold() -> f64 {
    DEFAULT_SEARCH_THRESHOLD
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/console", get(console_info_handler))
        .route("/api/view", get(get_view_handler).put(set_view_handler))
        .route("/api/list-directory", post(list_directory_handler))
        .route("/api/uploads", get(uploads_handler).post(upload_paths_handler))
        .route(
            "/api/uploads/drop",
            post(upload_drop_handler).layer(DefaultBodyLimit::max(MAX_DROP_BYTES)),
        )
        .route("/api/search", get(search_view_handler).post(search_handler))
        .route("/api/config", get(config_view_handler).put(config_save_handler))
        .route("/api/config/reload", post(config_reload_handler))
        .route("/api/statistics", get(stats_view_handler))
        .route("/api/statistics/refresh", post(stats_refresh_handler))
        .route("/api/health", get(health_handler))
        .route("/api/models", get(models_handler))
        .route("/api/databases", get(databases_handler))
        .route("/api/files/:id", delete(delete_file_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Vista activa ---

#[axum::debug_handler]
async fn console_info_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "backend_url": state.config.backend_url.as_str(),
        "token_present": state.transport.has_token(),
        "view": *lock(&state.view),
    }))
}

#[axum::debug_handler]
async fn get_view_handler(State(state): State<AppState>) -> Json<Value> {
    let view = *lock(&state.view);
    Json(json!({ "view": view }))
}

#[axum::debug_handler]
async fn set_view_handler(
    State(state): State<AppState>,
    Json(payload): Json<ViewPayload>,
) -> Json<Value> {
    *lock(&state.view) = payload.view;
    Json(json!({ "view": payload.view }))
}

// --- Subidas ---

#[axum::debug_handler]
async fn list_directory_handler(
    Json(payload): Json<ListDirPayload>,
) -> Result<Json<FileTreeNode>, ApiError> {
    let path = if payload.path.is_empty() {
        dirs::home_dir().ok_or_else(|| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "No se pudo determinar el directorio home del usuario.",
            )
        })?
    } else {
        PathBuf::from(&payload.path)
    };

    if !path.is_dir() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "La ruta proporcionada no es un directorio válido.",
        ));
    }

    build_file_tree(&path).map(Json).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Error al leer el directorio: {e}"),
        )
    })
}

#[axum::debug_handler]
async fn upload_paths_handler(
    State(state): State<AppState>,
    Json(payload): Json<UploadPathsPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let paths: Vec<PathBuf> = payload.paths.iter().map(PathBuf::from).collect();
    let files = collect_files(&paths).map_err(upload_error)?;
    start_batch(state, files)
}

#[axum::debug_handler]
async fn upload_drop_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, &format!("Multipart inválido: {e}")))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, &format!("Error leyendo {name}: {e}"))
        })?;
        files.push(FileHandle::from_bytes(name, bytes.to_vec()));
    }
    start_batch(state, files)
}

/// Reserva el orquestador y lanza el lote en segundo plano.
fn start_batch(state: AppState, files: Vec<FileHandle>) -> Result<impl IntoResponse, ApiError> {
    if files.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No se recibió ningún fichero."));
    }

    let guard = state.uploads.reserve().map_err(upload_error)?;
    let batch_id = guard.batch_id();
    let count = files.len();

    let uploads = state.uploads.clone();
    spawn(async move {
        uploads.run_batch(guard, files).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "batch_id": batch_id, "files": count })),
    ))
}

#[axum::debug_handler]
async fn uploads_handler(State(state): State<AppState>) -> Json<UploadsView> {
    Json(state.uploads.view())
}

// --- Búsqueda ---

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<SearchView>, ApiError> {
    if !(1..=MAX_TOP_K).contains(&payload.top_k) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            &format!("top_k debe estar entre 1 y {MAX_TOP_K}."),
        ));
    }
    if !(0.0..=1.0).contains(&payload.threshold) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "threshold debe estar entre 0 y 1.",
        ));
    }

    let query = match payload.file_id {
        Some(id) if id.trim().is_empty() => {
            return Err(api_error(StatusCode::BAD_REQUEST, "file_id no puede estar vacío."));
        }
        Some(id) => SearchQuery::by_file(id),
        None => SearchQuery::new(payload.query),
    };
    let query = query.top_k(payload.top_k).threshold(payload.threshold);

    state.search.run_search(&query).await.map_err(search_error)?;
    Ok(Json(state.search.view()))
}

#[axum::debug_handler]
async fn search_view_handler(State(state): State<AppState>) -> Json<SearchView> {
    Json(state.search.view())
}

// --- Configuración ---

#[axum::debug_handler]
async fn config_view_handler(State(state): State<AppState>) -> Json<ConfigView> {
    Json(state.config_sync.view())
}

#[axum::debug_handler]
async fn config_reload_handler(
    State(state): State<AppState>,
) -> Result<Json<ConfigView>, ApiError> {
    state.config_sync.load().await.map_err(config_error)?;
    Ok(Json(state.config_sync.view()))
}

#[axum::debug_handler]
async fn config_save_handler(
    State(state): State<AppState>,
    Json(draft): Json<ConfigDraft>,
) -> Result<Json<ConfigView>, ApiError> {
    state.config_sync.save(draft).await.map_err(config_error)?;
    info!("Configuración actualizada desde la consola.");
    Ok(Json(state.config_sync.view()))
}

// --- Estadísticas ---

#[axum::debug_handler]
async fn stats_view_handler(State(state): State<AppState>) -> Json<StatsView> {
    Json(state.stats.view())
}

#[axum::debug_handler]
async fn stats_refresh_handler(
    State(state): State<AppState>,
) -> Result<Json<StatsView>, ApiError> {
    state.stats.refresh().await.map_err(|e| network_error(&e))?;
    Ok(Json(state.stats.view()))
}

// --- Catálogo ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    catalog::health(&state.transport)
        .await
        .map(Json)
        .map_err(|e| network_error(&e))
}

#[axum::debug_handler]
async fn models_handler(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    catalog::available_models(&state.transport)
        .await
        .map(Json)
        .map_err(|e| network_error(&e))
}

#[axum::debug_handler]
async fn databases_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<VectorDbInfo>>, ApiError> {
    catalog::available_databases(&state.transport)
        .await
        .map(Json)
        .map_err(|e| network_error(&e))
}

#[axum::debug_handler]
async fn delete_file_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    catalog::delete_file(&state.transport, &id)
        .await
        .map_err(|e| network_error(&e))?;
    Ok(Json(json!({ "message": format!("Fichero {id} eliminado.") })))
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = lock(&state.shutdown_sender).take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

/// Traduce un fallo del backend a una respuesta de la consola.
fn network_error(err: &NetworkError) -> ApiError {
    let status = match err {
        NetworkError::ServerError { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        NetworkError::NetworkUnreachable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
        NetworkError::NetworkUnreachable { .. } | NetworkError::MalformedResponse { .. } => {
            StatusCode::BAD_GATEWAY
        }
        NetworkError::ClientFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, &err.user_message())
}

fn search_error(err: SearchError) -> ApiError {
    match err {
        SearchError::Network(e) => network_error(&e),
        SearchError::Busy => api_error(StatusCode::CONFLICT, "Ya hay una búsqueda en curso."),
    }
}

fn config_error(err: ConfigError) -> ApiError {
    match err {
        ConfigError::Network(e) => network_error(&e),
        ConfigError::Invalid(msg) => api_error(StatusCode::BAD_REQUEST, &msg),
        ConfigError::Busy => api_error(StatusCode::CONFLICT, "Ya hay un guardado en curso."),
    }
}

fn upload_error(err: UploadError) -> ApiError {
    match err {
        UploadError::Busy => {
            warn!("Lote rechazado: ya hay otro en curso.");
            api_error(StatusCode::CONFLICT, "Ya hay un lote de subida en curso.")
        }
        UploadError::Io { .. } => {
            error!("{err}");
            api_error(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn build_file_tree(path: &FsPath) -> std::io::Result<FileTreeNode> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let is_dir = metadata.is_dir();
    let mut children = Vec::new();

    if is_dir {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(Result::ok)
            .collect();

        entries.sort_by(|a, b| {
            let a_is_dir = a.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let b_is_dir = b.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            b_is_dir.cmp(&a_is_dir).then_with(|| a.file_name().cmp(&b.file_name()))
        });

        for entry in entries {
            if let Ok(entry_meta) = entry.metadata() {
                children.push(FileTreeNode {
                    path: entry.path(),
                    name: entry.file_name().to_string_lossy().to_string(),
                    is_dir: entry_meta.is_dir(),
                    size_bytes: (!entry_meta.is_dir()).then(|| entry_meta.len()),
                    children: Vec::new(),
                });
            }
        }
    }

    Ok(FileTreeNode {
        path: path.to_path_buf(),
        name,
        is_dir,
        size_bytes: (!is_dir).then(|| metadata.len()),
        children,
    })
}
