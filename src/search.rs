//! Controlador de búsqueda por similitud.
//!
//! Cada búsqueda sustituye por completo la lista de resultados; si falla,
//! la lista anterior se conserva intacta.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app_state::{lock, FlagGuard};
use crate::models::{FileKind, SearchQuery, SearchResponse, SearchResult, SearchTarget};
use crate::transport::{NetworkError, TransportClient};

const SEARCH_PATH: &str = "/search";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("ya hay una búsqueda en curso")]
    Busy,
}

impl SearchError {
    pub fn user_message(&self) -> String {
        match self {
            SearchError::Network(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Consulta de texto vacía: no se envía nada ni se toca el estado.
    Skipped,
    Completed { results: usize },
}

#[derive(Debug, Default)]
struct SearchState {
    last_query: Option<SearchTarget>,
    results: Vec<SearchResult>,
    query_time: f64,
    searching: bool,
    last_error: Option<String>,
}

fn searching(state: &mut SearchState) -> &mut bool {
    &mut state.searching
}

#[derive(Clone)]
pub struct SearchController {
    transport: TransportClient,
    state: Arc<Mutex<SearchState>>,
}

impl SearchController {
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(SearchState::default())),
        }
    }

    /// Lanza una búsqueda. Sólo una a la vez: mientras otra está en curso
    /// devuelve [`SearchError::Busy`].
    pub async fn run_search(&self, query: &SearchQuery) -> Result<SearchOutcome, SearchError> {
        if let SearchTarget::Text(text) = &query.target {
            if text.trim().is_empty() {
                debug!("Consulta vacía, búsqueda omitida");
                return Ok(SearchOutcome::Skipped);
            }
        }

        let _searching =
            FlagGuard::try_acquire(&self.state, searching).ok_or(SearchError::Busy)?;

        let result = self
            .transport
            .post_json::<_, SearchResponse>(SEARCH_PATH, &query.request())
            .await;

        let mut state = lock(&self.state);
        match result {
            Ok(response) => {
                let count = response.results.len();
                info!(
                    "Búsqueda {} completada: {} resultados en {:.3}s",
                    query.target, count, response.query_time
                );
                state.last_query = Some(query.target.clone());
                state.results = response.results;
                state.query_time = response.query_time;
                state.last_error = None;
                Ok(SearchOutcome::Completed { results: count })
            }
            Err(err) => {
                warn!("Búsqueda {} fallida: {}", query.target, err);
                state.last_error = Some(err.user_message());
                Err(err.into())
            }
        }
    }

    pub fn is_searching(&self) -> bool {
        lock(&self.state).searching
    }

    pub fn results(&self) -> Vec<SearchResult> {
        lock(&self.state).results.clone()
    }

    /// Tiempo de consulta informado por el backend, en segundos.
    pub fn query_time(&self) -> f64 {
        lock(&self.state).query_time
    }

    pub fn view(&self) -> SearchView {
        let state = lock(&self.state);
        let rows = state
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| SearchRow {
                rank: i + 1,
                file_id: r.file_id.clone(),
                filename: r.filename.clone(),
                file_type: r.file_type,
                similarity: format_similarity(r.similarity),
                thumbnail_url: r.thumbnail_url.clone(),
                metadata: r.metadata.clone(),
            })
            .collect::<Vec<_>>();

        SearchView {
            query: state.last_query.clone(),
            searching: state.searching,
            result_count: rows.len(),
            query_time: format_latency(state.query_time),
            empty: !state.searching && rows.is_empty() && state.last_query.is_some(),
            rows,
            error: state.last_error.clone(),
        }
    }
}

// --- Vista ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub rank: usize,
    pub file_id: String,
    pub filename: String,
    pub file_type: FileKind,
    pub similarity: String,
    pub thumbnail_url: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchView {
    pub query: Option<SearchTarget>,
    pub searching: bool,
    pub result_count: usize,
    pub query_time: String,
    /// Hubo búsqueda pero sin resultados.
    pub empty: bool,
    pub rows: Vec<SearchRow>,
    pub error: Option<String>,
}

/// Segundos a milisegundos con dos decimales.
pub fn format_latency(seconds: f64) -> String {
    format!("{:.2}ms", seconds * 1000.0)
}

pub fn format_similarity(similarity: f64) -> String {
    format!("{:.1}%", similarity * 100.0)
}
