use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use knowledge_console_webapp::{
    api,
    app_state::AppState,
    config,
    token_store::{FileTokenStore, TokenStore, API_TOKEN_KEY},
    transport::TransportClient,
};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Preparar el almacén del token y el cliente del backend
    let tokens = FileTokenStore::from_dir(&cfg.token_dir);
    if tokens.get(API_TOKEN_KEY).is_none() {
        warn!(
            "No hay token en {}; las peticiones irán sin cabecera Authorization.",
            tokens.dir().join(API_TOKEN_KEY).display()
        );
    }
    let transport = TransportClient::new(cfg.backend_url.clone(), Arc::new(tokens))
        .context("Error creando el cliente HTTP")?;
    info!("Backend remoto: {}", cfg.backend_url);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), transport, shutdown_tx);

    // 5. Primera carga de configuración y estadísticas (los fallos ya quedan en el log)
    if app_state.config_sync.load().await.is_err() {
        warn!("La configuración remota no está disponible todavía.");
    }
    if app_state.stats.refresh().await.is_err() {
        warn!("Las estadísticas remotas no están disponibles todavía.");
    }

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", listener.local_addr()?);
    info!("🚀 Consola escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor")?;

    info!("✅ Consola cerrada correctamente.");
    Ok(())
}
