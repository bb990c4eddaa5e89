//! Operaciones sin estado del contrato REST: salud, borrado y catálogos.

use serde::Deserialize;
use tracing::info;

use crate::models::{HealthReport, ModelInfo, VectorDbInfo};
use crate::transport::{NetworkError, TransportClient};

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct DatabasesResponse {
    databases: Vec<VectorDbInfo>,
}

pub async fn health(transport: &TransportClient) -> Result<HealthReport, NetworkError> {
    transport.get_json("/health").await
}

/// Borra un fichero indexado. El id viaja como un único segmento de ruta.
pub async fn delete_file(transport: &TransportClient, file_id: &str) -> Result<(), NetworkError> {
    let segment = encode_segment(file_id);
    let _: serde_json::Value = transport.delete_json(&format!("/files/{segment}")).await?;
    info!("Fichero {file_id} eliminado del backend");
    Ok(())
}

pub async fn available_models(transport: &TransportClient) -> Result<Vec<ModelInfo>, NetworkError> {
    let resp: ModelsResponse = transport.get_json("/models").await?;
    Ok(resp.models)
}

pub async fn available_databases(
    transport: &TransportClient,
) -> Result<Vec<VectorDbInfo>, NetworkError> {
    let resp: DatabasesResponse = transport.get_json("/databases").await?;
    Ok(resp.databases)
}

fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client_for, spawn_backend};
    use axum::{
        extract::Path,
        http::StatusCode,
        routing::{delete, get},
        Json, Router,
    };
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn catalog_backend() -> Router {
        Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(json!({
                        "status": "degraded",
                        "version": "1.0.0",
                        "components": { "embedder": "healthy", "vector_db": "unavailable" }
                    }))
                }),
            )
            .route(
                "/files/:id",
                delete(|Path(id): Path<String>| async move {
                    if id == "doc 1/a" {
                        (StatusCode::OK, Json(json!({ "status": "success" })))
                    } else {
                        (
                            StatusCode::NOT_FOUND,
                            Json(json!({ "detail": format!("File not found: {id}") })),
                        )
                    }
                }),
            )
            .route(
                "/models",
                get(|| async {
                    Json(json!({ "models": [{
                        "name": "openai/clip-vit-base-patch32",
                        "provider": "huggingface",
                        "dimension": 512,
                        "supported_types": ["image", "document"]
                    }]}))
                }),
            )
            .route(
                "/databases",
                get(|| async {
                    Json(json!({ "databases": [
                        { "name": "chroma", "features": ["Easy to use"] },
                        { "name": "faiss", "description": "Facebook AI Similarity Search", "features": [] }
                    ]}))
                }),
            )
    }

    #[tokio::test]
    async fn reads_health_and_catalogs() {
        let client = client_for(spawn_backend(catalog_backend()).await, None);

        let report = assert_ok!(health(&client).await);
        assert_eq!(report.status, "degraded");
        assert_eq!(report.components["vector_db"], "unavailable");

        let models = assert_ok!(available_models(&client).await);
        assert_eq!(models[0].dimension, 512);
        assert_eq!(models[0].supported_types.len(), 2);

        let dbs = assert_ok!(available_databases(&client).await);
        let names: Vec<_> = dbs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["chroma", "faiss"]);
    }

    #[tokio::test]
    async fn delete_encodes_the_id_and_surfaces_not_found() {
        let client = client_for(spawn_backend(catalog_backend()).await, None);
        assert_ok!(delete_file(&client, "doc 1/a").await);

        let err = assert_err!(delete_file(&client, "nope").await);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.user_message(), "File not found: nope");
    }

    #[test]
    fn segments_are_percent_encoded() {
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
    }
}
