/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Model, index and catalog locations shared with the CLI.
    pub core: biocast_core::Config,
    /// Socket address the web UI listens on (default: 127.0.0.1:8501).
    pub listen_addr: String,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `BIOCAST_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            core: biocast_core::Config::from_env(),
            listen_addr: std::env::var("BIOCAST_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8501".to_string()),
            max_upload_bytes: env_usize("BIOCAST_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
