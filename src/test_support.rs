//! Utilidades compartidas por los tests: un backend falso servido con axum.

use std::sync::Arc;

use axum::Router;
use url::Url;

use crate::token_store::MemoryTokenStore;
use crate::transport::TransportClient;

/// Levanta `router` bajo `/api/v1` en un puerto efímero y devuelve la URL base.
pub async fn spawn_backend(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().nest("/api/v1", router);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/api/v1/")).unwrap()
}

/// URL de un puerto que estuvo abierto y ya no escucha.
pub async fn unreachable_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}/api/v1/")).unwrap()
}

pub fn client_for(base: Url, token: Option<&str>) -> TransportClient {
    let store = match token {
        Some(t) => MemoryTokenStore::with_token(t),
        None => MemoryTokenStore::default(),
    };
    TransportClient::new(base, Arc::new(store)).unwrap()
}
