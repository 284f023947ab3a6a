//! HTTP client for the workflow engine.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::room::events::RoomStateView;
use crate::room::queue::Track;

use super::{EngineAck, EngineError, WorkflowEngine};

/// `PUT {engine_url}/workflows/{workflow_id}/{operation}` with a JSON body
/// carrying the run id and operation arguments.
pub struct HttpWorkflowEngine {
    base_url: String,
    http: reqwest::Client,
}

impl HttpWorkflowEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build engine http client"),
        }
    }

    fn url(&self, workflow_id: &str, operation: &str) -> String {
        format!("{}/workflows/{}/{}", self.base_url, workflow_id, operation)
    }

    async fn put(
        &self,
        workflow_id: &str,
        operation: &str,
        body: Value,
    ) -> Result<EngineAck, EngineError> {
        let url = self.url(workflow_id, operation);
        let resp = self
            .http
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(format!("{status}: {text}")));
        }
        if !status.is_success() {
            return Err(EngineError::Unavailable(format!("engine returned {status}")));
        }

        resp.json().await.map_err(|e| {
            tracing::error!(%url, ?e, "engine response parse failed");
            EngineError::Unavailable("unparseable engine response".to_string())
        })
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn create(
        &self,
        workflow_id: &str,
        run_id: &str,
        state: &RoomStateView,
    ) -> Result<EngineAck, EngineError> {
        self.put(
            workflow_id,
            "create",
            json!({ "run_id": run_id, "state": state }),
        )
        .await
    }

    async fn join(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.put(
            workflow_id,
            "join",
            json!({ "run_id": run_id, "user_id": user_id, "device_id": device_id }),
        )
        .await
    }

    async fn leave(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.put(
            workflow_id,
            "leave",
            json!({ "run_id": run_id, "user_id": user_id }),
        )
        .await
    }

    async fn play(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError> {
        self.put(workflow_id, "play", json!({ "run_id": run_id }))
            .await
    }

    async fn pause(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError> {
        self.put(workflow_id, "pause", json!({ "run_id": run_id }))
            .await
    }

    async fn go_to_next_track(
        &self,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.put(workflow_id, "go-to-next-track", json!({ "run_id": run_id }))
            .await
    }

    async fn suggest_tracks(
        &self,
        workflow_id: &str,
        run_id: &str,
        tracks: &[Track],
    ) -> Result<EngineAck, EngineError> {
        self.put(
            workflow_id,
            "suggest-tracks",
            json!({ "run_id": run_id, "tracks": tracks }),
        )
        .await
    }

    async fn change_user_emitting_device(
        &self,
        workflow_id: &str,
        run_id: &str,
        user_id: &str,
        device_id: &str,
    ) -> Result<EngineAck, EngineError> {
        self.put(
            workflow_id,
            "change-user-emitting-device",
            json!({ "run_id": run_id, "user_id": user_id, "device_id": device_id }),
        )
        .await
    }

    async fn state(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError> {
        self.put(workflow_id, "state", json!({ "run_id": run_id }))
            .await
    }

    async fn terminate(&self, workflow_id: &str, run_id: &str) -> Result<EngineAck, EngineError> {
        self.put(workflow_id, "terminate", json!({ "run_id": run_id }))
            .await
    }
}
