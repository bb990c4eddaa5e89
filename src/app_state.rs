use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    config::AppConfig, config_sync::ConfigSyncController, search::SearchController,
    stats::StatisticsViewer, transport::TransportClient, upload::UploadOrchestrator,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub transport: TransportClient,
    pub uploads: UploadOrchestrator,
    pub search: SearchController,
    pub config_sync: ConfigSyncController,
    pub stats: StatisticsViewer,
    pub view: Arc<Mutex<ActiveView>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        transport: TransportClient,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Self {
        Self {
            config,
            uploads: UploadOrchestrator::new(transport.clone()),
            search: SearchController::new(transport.clone()),
            config_sync: ConfigSyncController::new(transport.clone()),
            stats: StatisticsViewer::new(transport.clone()),
            transport,
            view: Arc::new(Mutex::new(ActiveView::default())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }
}

/// Vista activa de la consola. Sólo una a la vez.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveView {
    #[default]
    Upload,
    Search,
    Stats,
    Config,
}

/// Bloquea un mutex de estado recuperándolo si otro hilo entró en pánico con él.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Indicador booleano (`searching`, `saving`, `loading`) dentro de un estado compartido.
pub(crate) type Flag<S> = fn(&mut S) -> &mut bool;

/// Mantiene un indicador a `true` mientras vive. Al soltarse lo devuelve a
/// `false`, también cuando el futuro que lo posee se cancela.
pub(crate) struct FlagGuard<S> {
    state: Arc<Mutex<S>>,
    flag: Flag<S>,
}

impl<S> FlagGuard<S> {
    /// Activa el indicador sólo si estaba libre, dentro del mismo bloqueo.
    pub(crate) fn try_acquire(state: &Arc<Mutex<S>>, flag: Flag<S>) -> Option<Self> {
        let mut guard = lock(state);
        let slot = flag(&mut *guard);
        if *slot {
            return None;
        }
        *slot = true;
        drop(guard);
        Some(Self {
            state: state.clone(),
            flag,
        })
    }

    /// Activa el indicador sin comprobar si ya lo estaba.
    pub(crate) fn raise(state: &Arc<Mutex<S>>, flag: Flag<S>) -> Self {
        *flag(&mut *lock(state)) = true;
        Self {
            state: state.clone(),
            flag,
        }
    }
}

impl<S> Drop for FlagGuard<S> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        *(self.flag)(&mut *state) = false;
    }
}
