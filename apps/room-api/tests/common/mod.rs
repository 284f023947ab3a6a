use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use room_api::config::Config;
use room_api::engine::{EngineAck, EngineError, WorkflowEngine};
use room_api::room::events::RoomStateView;
use room_api::room::queue::Track;
use room_api::AppState;

/// In-process workflow engine double.
///
/// Acknowledges everything, records the operations it saw, and can be told
/// to fail or hang `create` for rollback tests.
#[derive(Default)]
pub struct MockEngine {
    pub fail_create: AtomicBool,
    pub hang_create: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &str) -> Result<EngineAck, EngineError> {
        self.calls.lock().push(op.to_string());
        Ok(EngineAck::default())
    }
}

#[async_trait]
impl WorkflowEngine for MockEngine {
    async fn create(
        &self,
        _workflow_id: &str,
        _run_id: &str,
        _state: &RoomStateView,
    ) -> Result<EngineAck, EngineError> {
        if self.hang_create.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            self.calls.lock().push("create".to_string());
            return Err(EngineError::Unavailable("mock engine is down".to_string()));
        }
        self.record("create")
    }

    async fn join(
        &self,
        _workflow_id: &str,
        _run_id: &str,
        _user_id: &str,
        _device_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.record("join")
    }

    async fn leave(
        &self,
        _workflow_id: &str,
        _run_id: &str,
        _user_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.record("leave")
    }

    async fn play(&self, _workflow_id: &str, _run_id: &str) -> Result<EngineAck, EngineError> {
        self.record("play")
    }

    async fn pause(&self, _workflow_id: &str, _run_id: &str) -> Result<EngineAck, EngineError> {
        self.record("pause")
    }

    async fn go_to_next_track(
        &self,
        _workflow_id: &str,
        _run_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.record("go-to-next-track")
    }

    async fn suggest_tracks(
        &self,
        _workflow_id: &str,
        _run_id: &str,
        _tracks: &[Track],
    ) -> Result<EngineAck, EngineError> {
        self.record("suggest-tracks")
    }

    async fn change_user_emitting_device(
        &self,
        _workflow_id: &str,
        _run_id: &str,
        _user_id: &str,
        _device_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.record("change-user-emitting-device")
    }

    async fn state(&self, _workflow_id: &str, _run_id: &str) -> Result<EngineAck, EngineError> {
        self.record("state")
    }

    async fn terminate(&self, _workflow_id: &str, _run_id: &str) -> Result<EngineAck, EngineError> {
        self.record("terminate")
    }
}

pub fn test_config() -> Config {
    Config {
        engine_url: "http://engine.invalid".to_string(),
        engine_secret: "test-engine-secret".to_string(),
        port: 0,
        engine_timeout: Duration::from_millis(250),
        empty_room_grace: Duration::ZERO,
    }
}

pub fn test_state(engine: Arc<MockEngine>) -> AppState {
    AppState::new(test_config(), engine)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = room_api::routes::router().with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}
