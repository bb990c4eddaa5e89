//! Sincronización de la configuración remota.
//!
//! Se guardan dos vistas: la instantánea autoritativa (sólo lectura) y un
//! borrador editable con cuatro campos. Tras guardar siempre se vuelve a
//! leer la configuración: el borrador nunca pasa a ser la fuente de verdad.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::app_state::{lock, FlagGuard};
use crate::models::{ConfigDraft, ConfigSnapshot, ConfigUpdate, MAX_TOP_K};
use crate::transport::{NetworkError, TransportClient};

const CONFIG_PATH: &str = "/config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("borrador inválido: {0}")]
    Invalid(String),

    #[error("ya hay un guardado en curso")]
    Busy,
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Network(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct ConfigState {
    snapshot: Option<ConfigSnapshot>,
    draft: ConfigDraft,
    loading: bool,
    saving: bool,
    last_error: Option<String>,
    synced_at: Option<DateTime<Utc>>,
}

fn loading(state: &mut ConfigState) -> &mut bool {
    &mut state.loading
}

fn saving(state: &mut ConfigState) -> &mut bool {
    &mut state.saving
}

#[derive(Clone)]
pub struct ConfigSyncController {
    transport: TransportClient,
    state: Arc<Mutex<ConfigState>>,
}

impl ConfigSyncController {
    pub fn new(transport: TransportClient) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(ConfigState::default())),
        }
    }

    /// Lee la configuración y regenera el borrador a partir de ella.
    /// Si falla, instantánea y borrador quedan como estaban.
    pub async fn load(&self) -> Result<(), ConfigError> {
        let _loading = FlagGuard::raise(&self.state, loading);

        let result = self.transport.get_json::<ConfigSnapshot>(CONFIG_PATH).await;

        let mut state = lock(&self.state);
        match result {
            Ok(snapshot) => {
                state.draft = ConfigDraft::from_snapshot(&snapshot);
                state.snapshot = Some(snapshot);
                state.last_error = None;
                state.synced_at = Some(Utc::now());
                Ok(())
            }
            Err(err) => {
                warn!("No se pudo cargar la configuración: {err}");
                state.last_error = Some(err.user_message());
                Err(err.into())
            }
        }
    }

    /// Envía el borrador como actualización parcial y recarga la configuración.
    /// Si el envío falla, el borrador se conserva tal como se editó.
    pub async fn save(&self, draft: ConfigDraft) -> Result<(), ConfigError> {
        validate(&draft)?;
        let guard = FlagGuard::try_acquire(&self.state, saving).ok_or(ConfigError::Busy)?;
        lock(&self.state).draft = draft.clone();

        let update = ConfigUpdate::from(&draft);
        let result = self
            .transport
            .put_json::<_, serde_json::Value>(CONFIG_PATH, &update)
            .await;

        if let Err(err) = &result {
            warn!("No se pudo guardar la configuración: {err}");
            lock(&self.state).last_error = Some(err.user_message());
        }
        drop(guard);
        result?;

        info!(
            "Configuración guardada (modelo '{}', base vectorial '{}')",
            update.embedding_model, update.vector_db_provider
        );
        self.load().await
    }

    pub fn snapshot(&self) -> Option<ConfigSnapshot> {
        lock(&self.state).snapshot.clone()
    }

    pub fn draft(&self) -> ConfigDraft {
        lock(&self.state).draft.clone()
    }

    pub fn view(&self) -> ConfigView {
        let state = lock(&self.state);
        ConfigView {
            snapshot: state.snapshot.clone(),
            draft: state.draft.clone(),
            loading: state.loading,
            saving: state.saving,
            error: state.last_error.clone(),
            synced_at: state.synced_at,
        }
    }
}

fn validate(draft: &ConfigDraft) -> Result<(), ConfigError> {
    if !(1..=MAX_TOP_K).contains(&draft.default_top_k) {
        return Err(ConfigError::Invalid(format!(
            "default_top_k debe estar entre 1 y {MAX_TOP_K} (recibido {})",
            draft.default_top_k
        )));
    }
    if !(0.0..=1.0).contains(&draft.similarity_threshold) {
        return Err(ConfigError::Invalid(format!(
            "similarity_threshold debe estar entre 0 y 1 (recibido {})",
            draft.similarity_threshold
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub snapshot: Option<ConfigSnapshot>,
    pub draft: ConfigDraft,
    pub loading: bool,
    pub saving: bool,
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client_for, spawn_backend, unreachable_url};
    use axum::{
        extract::State,
        http::StatusCode,
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Clone)]
    struct FakeConfig {
        doc: Arc<Mutex<Value>>,
        puts: Arc<AtomicUsize>,
        reject: bool,
    }

    impl FakeConfig {
        fn new(reject: bool) -> Self {
            Self {
                doc: Arc::new(Mutex::new(json!({
                    "service": { "name": "Knowledge Retrieval Service", "version": "1.0.0", "debug": false },
                    "embedding": { "provider": "huggingface", "model_name": "all-MiniLM-L6-v2", "dimension": 384 },
                    "vector_db": { "provider": "chroma" },
                    "retrieval": { "default_top_k": 10, "similarity_threshold": 0.7 },
                    "file_processing": { "max_file_size": 104857600 }
                }))),
                puts: Arc::new(AtomicUsize::new(0)),
                reject,
            }
        }
    }

    /// El backend normaliza lo que recibe: recorta el modelo y pasa el proveedor a minúsculas.
    fn config_backend(fake: FakeConfig) -> Router {
        Router::new()
            .route(
                "/config",
                get(|State(f): State<FakeConfig>| async move {
                    Json(f.doc.lock().unwrap().clone())
                })
                .put(|State(f): State<FakeConfig>, Json(body): Json<Value>| async move {
                    f.puts.fetch_add(1, Ordering::SeqCst);
                    if f.reject {
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({ "detail": "Error updating configuration: proveedor no disponible" })),
                        );
                    }
                    let mut doc = f.doc.lock().unwrap();
                    doc["embedding"]["model_name"] =
                        json!(body["embedding_model"].as_str().unwrap_or_default().trim());
                    doc["vector_db"]["provider"] =
                        json!(body["vector_db_provider"].as_str().unwrap_or_default().to_lowercase());
                    doc["retrieval"]["default_top_k"] = body["default_top_k"].clone();
                    doc["retrieval"]["similarity_threshold"] = body["similarity_threshold"].clone();
                    (StatusCode::OK, Json(json!({ "status": "success", "updates": body })))
                }),
            )
            .with_state(fake)
    }

    fn edited_draft() -> ConfigDraft {
        ConfigDraft {
            model_name: "  openai/clip-vit-base-patch32 ".into(),
            vector_db_provider: "Qdrant".into(),
            default_top_k: 25,
            similarity_threshold: 0.55,
        }
    }

    #[tokio::test]
    async fn load_projects_the_draft() {
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(config_backend(FakeConfig::new(false))).await,
            None,
        ));
        assert_ok!(ctl.load().await);

        let draft = ctl.draft();
        assert_eq!(draft.model_name, "all-MiniLM-L6-v2");
        assert_eq!(draft.vector_db_provider, "chroma");
        assert_eq!(draft.default_top_k, 10);
        let snapshot = ctl.snapshot().unwrap();
        assert_eq!(snapshot.embedding.unwrap().dimension, Some(384));
        assert_eq!(snapshot.service.unwrap().debug, Some(false));
        assert!(ctl.view().synced_at.is_some());
    }

    #[tokio::test]
    async fn save_reloads_the_server_canonical_state() {
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(config_backend(FakeConfig::new(false))).await,
            None,
        ));
        assert_ok!(ctl.load().await);
        assert_ok!(ctl.save(edited_draft()).await);

        let draft = ctl.draft();
        assert_eq!(draft.model_name, "openai/clip-vit-base-patch32");
        assert_eq!(draft.vector_db_provider, "qdrant");
        assert_eq!(draft.default_top_k, 25);
        assert_eq!(draft.similarity_threshold, 0.55);
        let snapshot = ctl.snapshot().unwrap();
        assert_eq!(snapshot.vector_db.unwrap().provider.as_deref(), Some("qdrant"));
        assert!(!ctl.view().saving);
    }

    #[tokio::test]
    async fn failed_save_keeps_the_edited_draft() {
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(config_backend(FakeConfig::new(true))).await,
            None,
        ));
        assert_ok!(ctl.load().await);
        let before = ctl.snapshot();

        let err = assert_err!(ctl.save(edited_draft()).await);
        assert_eq!(
            err.user_message(),
            "Error updating configuration: proveedor no disponible"
        );
        assert_eq!(ctl.draft(), edited_draft());
        assert_eq!(ctl.snapshot(), before);
        assert!(!ctl.view().saving);
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_the_backend() {
        let fake = FakeConfig::new(false);
        let puts = fake.puts.clone();
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(config_backend(fake)).await,
            None,
        ));

        let mut draft = edited_draft();
        draft.default_top_k = 0;
        assert!(matches!(ctl.save(draft).await, Err(ConfigError::Invalid(_))));

        let mut draft = edited_draft();
        draft.similarity_threshold = 1.5;
        assert!(matches!(ctl.save(draft).await, Err(ConfigError::Invalid(_))));

        assert_eq!(puts.load(Ordering::SeqCst), 0);
    }

    fn stalled_backend() -> Router {
        let stall = || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({}))
        };
        Router::new().route("/config", get(stall).put(stall))
    }

    #[tokio::test]
    async fn cancelled_save_and_load_release_their_flags() {
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(stalled_backend()).await,
            None,
        ));

        assert!(timeout(Duration::from_millis(100), ctl.save(edited_draft())).await.is_err());
        assert!(!ctl.view().saving);
        assert!(timeout(Duration::from_millis(100), ctl.load()).await.is_err());
        assert!(!ctl.view().loading);

        // Un nuevo guardado no se rechaza como ocupado.
        let retry = timeout(Duration::from_millis(100), ctl.save(edited_draft())).await;
        assert!(retry.is_err());
    }

    #[tokio::test]
    async fn overlapping_save_is_rejected() {
        let ctl = ConfigSyncController::new(client_for(
            spawn_backend(stalled_backend()).await,
            None,
        ));

        let running = ctl.clone();
        let first = tokio::spawn(async move { running.save(edited_draft()).await });
        while !ctl.view().saving {
            tokio::task::yield_now().await;
        }

        assert!(matches!(ctl.save(edited_draft()).await, Err(ConfigError::Busy)));
        first.abort();
    }

    #[tokio::test]
    async fn failed_load_keeps_defaults_and_reports() {
        let ctl = ConfigSyncController::new(client_for(unreachable_url().await, None));
        assert_err!(ctl.load().await);
        assert_eq!(ctl.draft(), ConfigDraft::default());
        assert!(ctl.snapshot().is_none());
        assert!(ctl.view().error.is_some());
    }
}
