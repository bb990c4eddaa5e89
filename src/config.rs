//! Carga y gestión de configuración de la consola (backend remoto + servidor local).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use url::Url;

/// Nombre del directorio propio dentro del directorio de configuración del usuario.
pub const APP_DIR_NAME: &str = "knowledge-console";

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// URL base del API remoto, siempre terminada en `/` (ej: `http://host/api/v1/`).
    pub backend_url: Url,
    pub server_addr: String,
    pub token_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let backend_url = parse_backend_url(
            &env::var("BACKEND_URL").unwrap_or_else(|_| "http://127.0.0.1:8000/api/v1".to_string()),
        )?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let token_dir = match env::var("TOKEN_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .map(|d| d.join(APP_DIR_NAME))
                .ok_or_else(|| anyhow!("No se pudo determinar el directorio de configuración; defina TOKEN_DIR"))?,
        };

        let frontend_dir = PathBuf::from(
            env::var("FRONTEND_DIR").unwrap_or_else(|_| "frontend".to_string()),
        );

        let open_browser = match env::var("OPEN_BROWSER") {
            Ok(v) => parse_flag(&v)?,
            Err(_) => true,
        };

        Ok(Self {
            backend_url,
            server_addr,
            token_dir,
            frontend_dir,
            open_browser,
        })
    }
}

/// Valida la URL del backend y normaliza la barra final para que `Url::join`
/// conserve el prefijo `/api/v1`.
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|e| anyhow!("BACKEND_URL inválida ('{raw}'): {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("Esquema no soportado en BACKEND_URL: {other}")),
    }
}

fn parse_flag(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("Valor booleano no reconocido: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_gets_trailing_slash() {
        let url = parse_backend_url("http://localhost:8000/api/v1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/");
        assert_eq!(url.join("search").unwrap().path(), "/api/v1/search");
    }

    #[test]
    fn backend_url_rejects_other_schemes() {
        assert!(parse_backend_url("ftp://localhost/api").is_err());
        assert!(parse_backend_url("no es una url").is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("off").unwrap());
        assert!(parse_flag("quizás").is_err());
    }
}
