use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use room_api::config::Config;
use room_api::engine::{HttpWorkflowEngine, WorkflowEngine};
use room_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let engine: Arc<dyn WorkflowEngine> = Arc::new(HttpWorkflowEngine::new(
        &config.engine_url,
        config.engine_timeout,
    ));

    tracing::info!(
        engine_url = %config.engine_url,
        empty_room_grace_secs = config.empty_room_grace.as_secs(),
        "room-api configured"
    );

    let state = AppState::new(config, engine);

    // Sweep rooms whose empty-grace period expired and tell the engine.
    if !state.config.empty_room_grace.is_zero() {
        let sweep_state = state.clone();
        let period = state.config.empty_room_grace.min(std::time::Duration::from_secs(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let expired = sweep_state.rooms.sweep_empty();
                for (room_id, run_id) in expired {
                    tracing::info!(room_id = %room_id, "empty room terminated");
                    room_api::engine::spawn_forward(
                        sweep_state.engine.clone(),
                        sweep_state.config.engine_timeout,
                        room_id,
                        run_id,
                        room_api::room::state::EngineForward::Terminate,
                    );
                }
            }
        });
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(room_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "room-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
