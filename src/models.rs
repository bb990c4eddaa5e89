//! Modelos de dominio: lo que devuelve el backend y lo que la consola guarda en memoria.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// --- Tipos de fichero ---

/// Categoría de contenido asignada por el backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Document,
    Video,
    Audio,
    #[serde(other)]
    Other,
}

impl FileKind {
    pub fn from_label(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => Self::Image,
            "document" => Self::Document,
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Subida de ficheros ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Failure,
}

/// Respuesta de `POST /files/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_type: Option<FileKind>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Resultado de un intento de subida. Inmutable una vez creado.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub name: String,
    pub size: u64,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Estado de procesamiento que informa el backend (`pending`, `completed`...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UploadRecord {
    pub fn success(name: &str, size: u64, resp: UploadResponse) -> Self {
        Self {
            name: name.to_string(),
            size,
            status: UploadStatus::Success,
            file_id: Some(resp.file_id),
            file_type: resp.file_type,
            error: None,
            processing_status: resp.status,
            message: resp.message,
        }
    }

    pub fn failure(name: &str, size: u64, error: String) -> Self {
        Self {
            name: name.to_string(),
            size,
            status: UploadStatus::Failure,
            file_id: None,
            file_type: None,
            error: Some(error),
            processing_status: None,
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Success
    }
}

// --- Búsqueda ---

pub const DEFAULT_SEARCH_TOP_K: u32 = 10;
/// Máximo de resultados que acepta el backend por consulta.
pub const MAX_TOP_K: u32 = 100;
/// Umbral por defecto de la búsqueda: se muestran todos los resultados.
pub const DEFAULT_SEARCH_THRESHOLD: f64 = 0.0;

/// Lo que se busca: un texto libre o un fichero ya indexado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SearchTarget {
    Text(String),
    File(String),
}

impl fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchTarget::Text(text) => write!(f, "'{text}'"),
            SearchTarget::File(id) => write!(f, "fichero {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub target: SearchTarget,
    pub top_k: u32,
    pub similarity_threshold: f64,
}

impl SearchQuery {
    /// Búsqueda por texto.
    pub fn new(text: impl Into<String>) -> Self {
        Self::for_target(SearchTarget::Text(text.into()))
    }

    /// Búsqueda usando un fichero indexado como consulta.
    pub fn by_file(file_id: impl Into<String>) -> Self {
        Self::for_target(SearchTarget::File(file_id.into()))
    }

    fn for_target(target: SearchTarget) -> Self {
        Self {
            target,
            top_k: DEFAULT_SEARCH_TOP_K,
            similarity_threshold: DEFAULT_SEARCH_THRESHOLD,
        }
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn request(&self) -> SearchRequest<'_> {
        let (query, file_id) = match &self.target {
            SearchTarget::Text(text) => (Some(text.as_str()), None),
            SearchTarget::File(id) => (None, Some(id.as_str())),
        };
        SearchRequest {
            query,
            file_id,
            top_k: self.top_k,
            threshold: self.similarity_threshold,
        }
    }
}

/// Cuerpo de `POST /search`. Sólo viaja uno de `query` o `file_id`.
#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<&'a str>,
    pub top_k: u32,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(deserialize_with = "string_or_number")]
    pub file_id: String,
    pub filename: String,
    pub file_type: FileKind,
    pub similarity: f64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub total: Option<u64>,
    pub query_time: f64,
}

// --- Configuración remota ---

/// Copia autoritativa de `GET /config`. Cualquier sección o campo puede faltar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub service: Option<ServiceSection>,
    #[serde(default)]
    pub embedding: Option<EmbeddingSection>,
    #[serde(default)]
    pub vector_db: Option<VectorDbSection>,
    #[serde(default)]
    pub retrieval: Option<RetrievalSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: Option<String>,
    pub version: Option<String>,
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: Option<String>,
    pub model_name: Option<String>,
    pub dimension: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbSection {
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub default_top_k: Option<u32>,
    pub similarity_threshold: Option<f64>,
}

/// Proyección editable de la configuración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDraft {
    pub model_name: String,
    pub vector_db_provider: String,
    pub default_top_k: u32,
    pub similarity_threshold: f64,
}

/// Valores usados cuando la respuesta del backend no trae el campo.
impl Default for ConfigDraft {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            vector_db_provider: String::new(),
            default_top_k: 10,
            similarity_threshold: 0.7,
        }
    }
}

impl ConfigDraft {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let defaults = Self::default();
        let embedding = snapshot.embedding.as_ref();
        let retrieval = snapshot.retrieval.as_ref();
        Self {
            model_name: embedding
                .and_then(|e| e.model_name.clone())
                .unwrap_or(defaults.model_name),
            vector_db_provider: snapshot
                .vector_db
                .as_ref()
                .and_then(|v| v.provider.clone())
                .unwrap_or(defaults.vector_db_provider),
            default_top_k: retrieval
                .and_then(|r| r.default_top_k)
                .unwrap_or(defaults.default_top_k),
            similarity_threshold: retrieval
                .and_then(|r| r.similarity_threshold)
                .unwrap_or(defaults.similarity_threshold),
        }
    }
}

/// Cuerpo de `PUT /config` con los nombres del backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigUpdate {
    pub embedding_model: String,
    pub vector_db_provider: String,
    pub default_top_k: u32,
    pub similarity_threshold: f64,
}

impl From<&ConfigDraft> for ConfigUpdate {
    fn from(draft: &ConfigDraft) -> Self {
        Self {
            embedding_model: draft.model_name.clone(),
            vector_db_provider: draft.vector_db_provider.clone(),
            default_top_k: draft.default_top_k,
            similarity_threshold: draft.similarity_threshold,
        }
    }
}

// --- Estadísticas ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_vectors: u64,
    #[serde(default, rename = "storage_used")]
    pub storage_used_bytes: u64,
    #[serde(default, deserialize_with = "files_by_kind")]
    pub files_by_type: BTreeMap<FileKind, u64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<NaiveDateTime>,
}

// --- Catálogo ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub timestamp: Option<String>,
    pub components: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub dimension: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub supported_types: Vec<FileKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDbInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

// --- Selector de directorio ---

#[derive(Debug, Clone, Serialize)]
pub struct FileTreeNode {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
    pub children: Vec<FileTreeNode>,
}

// --- Deserializadores tolerantes ---

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// Agrupa por [`FileKind`]; las etiquetas desconocidas se suman en `Other`.
fn files_by_kind<'de, D>(deserializer: D) -> Result<BTreeMap<FileKind, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, u64>> = Option::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (label, count) in raw.unwrap_or_default() {
        *out.entry(FileKind::from_label(&label)).or_insert(0) += count;
    }
    Ok(out)
}

/// Acepta RFC 3339 o fecha ISO sin zona; cualquier otra cosa queda como ausente.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_timestamp(&s)))
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}
