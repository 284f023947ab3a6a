use std::time::Duration;

/// Room API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The workflow engine origin (e.g. `http://localhost:4020`).
    pub engine_url: String,
    /// Shared secret expected in the `X-Engine-Secret` webhook header.
    pub engine_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Timeout applied to every workflow engine call.
    pub engine_timeout: Duration,
    /// How long an empty room stays alive before it is terminated.
    /// Zero means the room terminates the moment the last member leaves.
    pub empty_room_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            engine_url: required_var("ENGINE_URL"),
            engine_secret: required_var("ENGINE_SECRET"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            engine_timeout: Duration::from_millis(
                std::env::var("ENGINE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
            empty_room_grace: Duration::from_secs(
                std::env::var("EMPTY_ROOM_GRACE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            ),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
