//! Orquestador de subidas: un lote de ficheros se sube de uno en uno y cada
//! resultado se antepone al registro (el más reciente primero).
//!
//! Dentro de un lote nunca hay dos subidas en vuelo a la vez, y mientras un
//! lote está en curso no se acepta otro. No hay cancelación.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use mime_guess::MimeGuess;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::app_state::lock;
use crate::models::{UploadRecord, UploadResponse};
use crate::stats::format_bytes;
use crate::transport::TransportClient;

const UPLOAD_PATH: &str = "/files/upload";
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("ya hay un lote de subida en curso")]
    Busy,

    #[error("no se pudo acceder a {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// --- Ficheros de entrada ---

#[derive(Debug, Clone)]
enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Un fichero elegido por el operador: una ruta local o bytes soltados en el navegador.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    source: FileSource,
}

impl FileHandle {
    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let metadata = std::fs::metadata(path).map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    pub fn mime_type(&self) -> String {
        MimeGuess::from_path(&self.name)
            .first_or_octet_stream()
            .to_string()
    }

    async fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self.source {
            FileSource::Path(path) => tokio::fs::read(path).await,
            FileSource::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Convierte las rutas elegidas en ficheros; los directorios se recorren
/// recursivamente en orden alfabético.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<FileHandle>, UploadError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|e| UploadError::Io {
                    path: path.clone(),
                    source: e.into(),
                })?;
                if entry.file_type().is_file() {
                    files.push(FileHandle::from_path(entry.path())?);
                }
            }
        } else {
            files.push(FileHandle::from_path(path)?);
        }
    }
    Ok(files)
}

// --- Orquestador ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<UploadRecord>,
    busy: bool,
    current: Option<String>,
    progress: BatchProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    transport: TransportClient,
    state: Arc<Mutex<LedgerState>>,
}

/// Reserva exclusiva de un lote. Al soltarse, libera `busy`.
pub struct BatchGuard {
    batch_id: Uuid,
    state: Arc<Mutex<LedgerState>>,
}

impl BatchGuard {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.busy = false;
        state.current = None;
    }
}

impl UploadOrchestrator {
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    /// Marca el orquestador como ocupado, o falla si ya lo está.
    pub fn reserve(&self) -> Result<BatchGuard, UploadError> {
        let mut state = lock(&self.state);
        if state.busy {
            return Err(UploadError::Busy);
        }
        state.busy = true;
        state.progress = BatchProgress::default();
        Ok(BatchGuard {
            batch_id: Uuid::new_v4(),
            state: self.state.clone(),
        })
    }

    /// Reserva y sube el lote completo.
    pub async fn submit_batch(&self, files: Vec<FileHandle>) -> Result<BatchSummary, UploadError> {
        let guard = self.reserve()?;
        Ok(self.run_batch(guard, files).await)
    }

    /// Sube `files` en orden, uno tras otro. El fallo de un fichero no detiene el lote.
    pub async fn run_batch(&self, guard: BatchGuard, files: Vec<FileHandle>) -> BatchSummary {
        let batch_id = guard.batch_id();
        let total = files.len();
        info!("Lote {batch_id}: {total} ficheros para subir");
        lock(&self.state).progress = BatchProgress { done: 0, total };

        let mut summary = BatchSummary {
            batch_id,
            succeeded: 0,
            failed: 0,
        };

        for (index, file) in files.into_iter().enumerate() {
            lock(&self.state).current = Some(file.name.clone());

            let record = self.upload_one(file).await;
            if record.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }

            let mut state = lock(&self.state);
            state.records.insert(0, record);
            state.progress.done = index + 1;
        }

        info!(
            "Lote {batch_id} terminado: {} subidos, {} fallidos",
            summary.succeeded, summary.failed
        );
        drop(guard);
        summary
    }

    async fn upload_one(&self, file: FileHandle) -> UploadRecord {
        let name = file.name.clone();
        let size = file.size;
        let mime_type = file.mime_type();

        let bytes = match file.into_bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("No se pudo leer {name}: {e}");
                return UploadRecord::failure(&name, size, format!("no se pudo leer el fichero: {e}"));
            }
        };

        match self
            .transport
            .upload_file::<UploadResponse>(UPLOAD_PATH, UPLOAD_FIELD, &name, bytes, &mime_type)
            .await
        {
            Ok(resp) => {
                info!("Subido {name} como {}", resp.file_id);
                UploadRecord::success(&name, size, resp)
            }
            Err(err) => {
                warn!("Fallo subiendo {name}: {err}");
                UploadRecord::failure(&name, size, err.user_message())
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    /// Registro completo, el más reciente primero.
    pub fn records(&self) -> Vec<UploadRecord> {
        lock(&self.state).records.clone()
    }

    pub fn view(&self) -> UploadsView {
        let state = lock(&self.state);
        UploadsView {
            busy: state.busy,
            current: state.current.clone(),
            progress: state.progress,
            records: state
                .records
                .iter()
                .map(|r| UploadRow {
                    size_label: format_bytes(r.size),
                    record: r.clone(),
                })
                .collect(),
        }
    }
}

// --- Vista ---

#[derive(Debug, Clone, Serialize)]
pub struct UploadRow {
    #[serde(flatten)]
    pub record: UploadRecord,
    pub size_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadsView {
    pub busy: bool,
    pub current: Option<String>,
    pub progress: BatchProgress,
    pub records: Vec<UploadRow>,
}
