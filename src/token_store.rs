//! Almacén clave/valor duradero y síncrono para el token del API.
//!
//! La capa de orquestación sólo lee; nunca escribe, refresca ni invalida el token.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Clave bajo la que se guarda el token bearer.
pub const API_TOKEN_KEY: &str = "api_token";

pub trait TokenStore: Send + Sync {
    /// Devuelve el valor asociado a `key`, o `None` si no existe o está vacío.
    fn get(&self, key: &str) -> Option<String>;
}

/// Un fichero por clave dentro de un directorio.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let raw = fs::read_to_string(self.dir.join(key)).ok()?;
        let value = raw.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// Almacén en memoria para tests y usos embebidos.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        let store = Self::default();
        store.set(API_TOKEN_KEY, token);
        store
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().ok()?;
        values.get(key).filter(|v| !v.is_empty()).cloned()
    }
}
