//! Consola web para operar un servicio remoto de recuperación de conocimiento:
//! subida de ficheros, búsqueda por similitud, estadísticas y configuración.

pub mod api;
pub mod app_state;
pub mod catalog;
pub mod config;
pub mod config_sync;
pub mod models;
pub mod search;
pub mod stats;
pub mod token_store;
pub mod transport;
pub mod upload;

#[cfg(test)]
mod test_support;
