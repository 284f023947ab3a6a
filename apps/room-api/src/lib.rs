pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod room;
pub mod routes;

use std::sync::Arc;

use config::Config;
use engine::WorkflowEngine;
use gateway::fanout::RoomFanout;
use room::RoomRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub fanout: Arc<RoomFanout>,
    pub engine: Arc<dyn WorkflowEngine>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<dyn WorkflowEngine>) -> Self {
        let fanout = Arc::new(RoomFanout::new());
        let rooms = Arc::new(RoomRegistry::new(fanout.clone(), config.empty_room_grace));
        Self {
            config: Arc::new(config),
            rooms,
            fanout,
            engine,
        }
    }
}
