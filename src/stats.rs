//! Visor de estadísticas agregadas del backend. Sólo lectura.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::app_state::{lock, FlagGuard};
use crate::models::{FileKind, StatisticsSnapshot};
use crate::transport::{NetworkError, TransportClient};

const STATISTICS_PATH: &str = "/statistics";
const BYTE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

#[derive(Debug, Default)]
struct StatsState {
    snapshot: Option<StatisticsSnapshot>,
    loading: bool,
    last_error: Option<String>,
}

fn loading(state: &mut StatsState) -> &mut bool {
    &mut state.loading
}

#[derive(Clone)]
pub struct StatisticsViewer {
    transport: TransportClient,
    state: Arc<Mutex<StatsState>>,
}

impl StatisticsViewer {
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(StatsState::default())),
        }
    }

    /// Sustituye la instantánea por la que devuelva el backend.
    /// Si falla, se conserva la anterior.
    pub async fn refresh(&self) -> Result<(), NetworkError> {
        let _loading = FlagGuard::raise(&self.state, loading);

        let result = self
            .transport
            .get_json::<StatisticsSnapshot>(STATISTICS_PATH)
            .await;

        let mut state = lock(&self.state);
        match result {
            Ok(snapshot) => {
                info!(
                    "Estadísticas actualizadas: {} ficheros, {} vectores",
                    snapshot.total_files, snapshot.total_vectors
                );
                state.snapshot = Some(snapshot);
                state.last_error = None;
                Ok(())
            }
            Err(err) => {
                warn!("No se pudieron cargar las estadísticas: {err}");
                state.last_error = Some(err.user_message());
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> Option<StatisticsSnapshot> {
        lock(&self.state).snapshot.clone()
    }

    pub fn view(&self) -> StatsView {
        let state = lock(&self.state);
        let mut view = state
            .snapshot
            .as_ref()
            .map(StatsView::from_snapshot)
            .unwrap_or_default();
        view.loading = state.loading;
        view.error = state.last_error.clone();
        view
    }
}

// --- Vista ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindShare {
    pub kind: FileKind,
    pub count: u64,
    pub percentage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub loading: bool,
    pub total_files: u64,
    pub total_vectors: u64,
    pub storage_used: String,
    pub kind_count: usize,
    pub shares: Vec<KindShare>,
    pub last_updated: Option<String>,
    pub error: Option<String>,
}

impl Default for StatsView {
    fn default() -> Self {
        Self {
            loading: false,
            total_files: 0,
            total_vectors: 0,
            storage_used: format_bytes(0),
            kind_count: 0,
            shares: Vec::new(),
            last_updated: None,
            error: None,
        }
    }
}

impl StatsView {
    pub fn from_snapshot(snapshot: &StatisticsSnapshot) -> Self {
        let shares = snapshot
            .files_by_type
            .iter()
            .map(|(kind, count)| KindShare {
                kind: *kind,
                count: *count,
                percentage: percentage_share(*count, snapshot.total_files),
            })
            .collect::<Vec<_>>();

        Self {
            loading: false,
            total_files: snapshot.total_files,
            total_vectors: snapshot.total_vectors,
            storage_used: format_bytes(snapshot.storage_used_bytes),
            kind_count: shares.len(),
            shares,
            last_updated: snapshot
                .last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            error: None,
        }
    }
}

// --- Formato ---

/// Tamaño en unidades binarias (B/KB/MB/GB), con hasta dos decimales.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", trim_decimals(&format!("{rounded:.2}")), BYTE_UNITS[unit])
}

fn trim_decimals(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Porcentaje de `count` sobre `total` con un decimal; `total = 0` cuenta como 1.
pub fn percentage_share(count: u64, total: u64) -> String {
    let denominator = total.max(1) as f64;
    format!("{:.1}", count as f64 / denominator * 100.0)
}
