//! Cliente HTTP hacia el backend de recuperación.
//!
//! Todas las llamadas pasan por [`TransportClient::send`], que:
//!   - añade `Authorization: Bearer <token>` si hay token en el almacén,
//!   - aplica un timeout fijo por llamada,
//!   - clasifica cualquier fallo en [`NetworkError`] y lo registra en el log.
//!
//! No hay reintentos: es una primitiva de un único intento.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{multipart, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use url::Url;

use crate::token_store::{TokenStore, API_TOKEN_KEY};

/// Timeout fijo aplicado a cada petición.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// --- Errores ---

#[derive(Debug, Error)]
pub enum NetworkError {
    /// El servidor respondió con un estado fuera de 2xx.
    #[error("Request failed with status code {status}")]
    ServerError { status: u16, body: String },

    /// La petición salió pero no llegó respuesta (conexión, DNS, timeout).
    #[error("{message}")]
    NetworkUnreachable { message: String, timed_out: bool },

    /// La petición no pudo construirse ni enviarse.
    #[error("{message}")]
    ClientFault { message: String },

    /// Respuesta 2xx cuyo cuerpo no corresponde al contrato esperado.
    #[error("respuesta inesperada del servidor: {message}")]
    MalformedResponse { message: String },
}

impl NetworkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetworkError::NetworkUnreachable { timed_out: true, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Mensaje para el usuario: el `detail` del servidor si lo hay,
    /// si no el mensaje crudo del transporte.
    pub fn user_message(&self) -> String {
        if let NetworkError::ServerError { body, .. } = self {
            if let Some(detail) = server_detail(body) {
                return detail;
            }
        }
        self.to_string()
    }
}

/// Extrae el campo `detail` de un cuerpo de error JSON.
fn server_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// --- Cuerpo de la petición ---

pub enum RequestBody {
    Json(serde_json::Value),
    Multipart(multipart::Form),
}

// --- Cliente ---

#[derive(Clone)]
pub struct TransportClient {
    base_url: Url,
    http: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
}

impl TransportClient {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenStore>) -> Result<Self, NetworkError> {
        Self::with_timeout(base_url, tokens, REQUEST_TIMEOUT)
    }

    /// Igual que [`TransportClient::new`] pero con otro timeout (sólo tests).
    pub fn with_timeout(
        base_url: Url,
        tokens: Arc<dyn TokenStore>,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::ClientFault {
                message: format!("no se pudo crear el cliente HTTP: {e}"),
            })?;
        Ok(Self {
            base_url,
            http,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Indica si la próxima petición llevará cabecera `Authorization`.
    pub fn has_token(&self) -> bool {
        self.tokens.get(API_TOKEN_KEY).is_some()
    }

    /// Envía una petición y devuelve la respuesta 2xx, o el fallo clasificado.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Response, NetworkError> {
        let result = self.dispatch(method.clone(), path, body).await;
        if let Err(err) = &result {
            log_failure(&method, path, err);
        }
        result
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
    ) -> Result<Response, NetworkError> {
        let url = self.url(path)?;
        let mut builder = self.http.request(method, url);

        if let Some(token) = self.tokens.get(API_TOKEN_KEY) {
            builder = builder.bearer_auth(token);
        }

        builder = match body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        let request = builder.build().map_err(|e| NetworkError::ClientFault {
            message: e.to_string(),
        })?;

        let response = self.http.execute(request).await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("No se pudo leer el cuerpo de la respuesta {status}: {e}");
                    format!("cuerpo ilegible: {e}")
                }
            };
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Resuelve `path` relativo a la URL base, conservando su prefijo.
    fn url(&self, path: &str) -> Result<Url, NetworkError> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() || relative.contains("://") {
            return Err(NetworkError::ClientFault {
                message: format!("ruta de API inválida: '{path}'"),
            });
        }
        self.base_url
            .join(relative)
            .map_err(|e| NetworkError::ClientFault {
                message: format!("ruta de API inválida '{path}': {e}"),
            })
    }

    // --- Atajos tipados ---

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let resp = self.send(Method::GET, path, None).await?;
        self.decode(&Method::GET, path, resp).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NetworkError> {
        self.json_call(Method::POST, path, body).await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NetworkError> {
        self.json_call(Method::PUT, path, body).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let resp = self.send(Method::DELETE, path, None).await?;
        self.decode(&Method::DELETE, path, resp).await
    }

    /// Sube un único fichero como multipart con el campo `field`.
    pub async fn upload_file<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<T, NetworkError> {
        let part = match multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
        {
            Ok(part) => part,
            Err(e) => {
                let err = NetworkError::ClientFault {
                    message: format!("tipo MIME inválido '{mime_type}': {e}"),
                };
                log_failure(&Method::POST, path, &err);
                return Err(err);
            }
        };
        let form = multipart::Form::new().part(field.to_string(), part);
        let resp = self
            .send(Method::POST, path, Some(RequestBody::Multipart(form)))
            .await?;
        self.decode(&Method::POST, path, resp).await
    }

    async fn json_call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, NetworkError> {
        let value = match serde_json::to_value(body) {
            Ok(value) => value,
            Err(e) => {
                let err = NetworkError::ClientFault {
                    message: format!("no se pudo serializar el cuerpo: {e}"),
                };
                log_failure(&method, path, &err);
                return Err(err);
            }
        };
        let resp = self
            .send(method.clone(), path, Some(RequestBody::Json(value)))
            .await?;
        self.decode(&method, path, resp).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        resp: Response,
    ) -> Result<T, NetworkError> {
        let result = match resp.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                NetworkError::MalformedResponse {
                    message: format!("JSON inválido: {e}"),
                }
            }),
            Err(e) => Err(classify(e)),
        };
        if let Err(err) = &result {
            log_failure(method, path, err);
        }
        result
    }
}

/// Clasifica un error de reqwest producido al ejecutar la petición.
fn classify(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::NetworkUnreachable {
            message: "timeout".to_string(),
            timed_out: true,
        }
    } else if e.is_builder() {
        NetworkError::ClientFault {
            message: e.to_string(),
        }
    } else {
        NetworkError::NetworkUnreachable {
            message: e.to_string(),
            timed_out: false,
        }
    }
}

fn log_failure(method: &Method, path: &str, err: &NetworkError) {
    match err {
        NetworkError::ServerError { status, body } => {
            error!("Error del API en {method} {path} ({status}): {body}")
        }
        NetworkError::NetworkUnreachable { message, .. } => {
            error!("Error de red en {method} {path}: {message}")
        }
        NetworkError::ClientFault { message } => {
            error!("Error en {method} {path}: {message}")
        }
        NetworkError::MalformedResponse { message } => {
            error!("Respuesta inesperada en {method} {path}: {message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client_for, spawn_backend, unreachable_url};
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio_test::{assert_err, assert_ok};

    fn echo_auth() -> Router {
        Router::new().route(
            "/health",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Json(json!({ "auth": auth }))
            }),
        )
    }

    #[tokio::test]
    async fn bearer_header_is_attached_when_token_exists() {
        let base = spawn_backend(echo_auth()).await;
        let client = client_for(base, Some("s3cr3t"));
        let body: Value = assert_ok!(client.get_json("/health").await);
        assert_eq!(body["auth"], "Bearer s3cr3t");
    }

    #[tokio::test]
    async fn bearer_header_is_omitted_without_token() {
        let base = spawn_backend(echo_auth()).await;
        let client = client_for(base, None);
        let body: Value = assert_ok!(client.get_json("health").await);
        assert!(body["auth"].is_null());
    }

    #[tokio::test]
    async fn non_2xx_becomes_server_error_with_detail() {
        let router = Router::new().route(
            "/config",
            get(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "detail": "top_k fuera de rango" })),
                )
            }),
        );
        let client = client_for(spawn_backend(router).await, None);
        let err = assert_err!(client.get_json::<Value>("/config").await);
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.user_message(), "top_k fuera de rango");
    }

    #[tokio::test]
    async fn server_error_without_detail_falls_back_to_raw_message() {
        let router = Router::new().route(
            "/config",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let client = client_for(spawn_backend(router).await, None);
        let err = assert_err!(client.get_json::<Value>("/config").await);
        assert_eq!(err.user_message(), "Request failed with status code 500");
    }

    #[tokio::test]
    async fn refused_connection_is_network_unreachable() {
        let client = client_for(unreachable_url().await, None);
        let err = assert_err!(client.get_json::<Value>("/health").await);
        assert!(matches!(err, NetworkError::NetworkUnreachable { timed_out: false, .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let router = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({}))
            }),
        );
        let base = spawn_backend(router).await;
        let client = TransportClient::with_timeout(
            base,
            Arc::new(crate::token_store::MemoryTokenStore::default()),
            Duration::from_millis(150),
        )
        .unwrap();
        let err = assert_err!(client.get_json::<Value>("/health").await);
        assert!(err.is_timeout());
        assert_eq!(err.user_message(), "timeout");
    }

    #[tokio::test]
    async fn malformed_path_is_client_fault() {
        let client = client_for(unreachable_url().await, None);
        let err = assert_err!(client.send(Method::GET, "", None).await);
        assert!(matches!(err, NetworkError::ClientFault { .. }));
        let err = assert_err!(client.send(Method::GET, "http://otro/host", None).await);
        assert!(matches!(err, NetworkError::ClientFault { .. }));
    }

    #[tokio::test]
    async fn invalid_json_on_success_is_malformed_response() {
        let router = Router::new().route("/statistics", get(|| async { "no-json" }));
        let client = client_for(spawn_backend(router).await, None);
        let err = assert_err!(client.get_json::<Value>("/statistics").await);
        assert!(matches!(err, NetworkError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn truncated_error_body_is_reported_in_the_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\n\r\nparcial")
                .await
                .unwrap();
        });

        let base = Url::parse(&format!("http://{addr}/api/v1/")).unwrap();
        let client = client_for(base, None);
        let err = assert_err!(client.get_json::<Value>("/health").await);
        assert_eq!(err.status(), Some(500));
        match err {
            NetworkError::ServerError { body, .. } => assert!(body.starts_with("cuerpo ilegible")),
            other => panic!("error inesperado: {other:?}"),
        }
    }

    #[test]
    fn detail_may_be_structured() {
        let err = NetworkError::ServerError {
            status: 422,
            body: r#"{"detail":[{"loc":["top_k"]}]}"#.to_string(),
        };
        assert_eq!(err.user_message(), r#"[{"loc":["top_k"]}]"#);
    }
}
