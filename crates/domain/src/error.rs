use std::path::PathBuf;

/// Shared error type used across all multibot crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    // ── Bot lifecycle ────────────────────────────────────────────────
    #[error("bot not found: {0}")]
    BotNotFound(String),

    #[error("bot already running: {0}")]
    BotAlreadyRunning(String),

    #[error("bot not running: {0}")]
    BotNotRunning(String),

    // ── Plugins ──────────────────────────────────────────────────────
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin load failed at {path}: {reason}")]
    PluginLoadFailed { path: PathBuf, reason: String },

    #[error("circular plugin dependency: {0}")]
    PluginCycle(String),

    // ── Configuration ────────────────────────────────────────────────
    #[error("config {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("config file missing: {0}")]
    ConfigFileMissing(PathBuf),

    // ── Billing ──────────────────────────────────────────────────────
    #[error("insufficient tokens for {action}: need {required}, have {available}")]
    InsufficientTokens {
        required: i64,
        available: i64,
        action: String,
    },

    // ── Telegram wire ────────────────────────────────────────────────
    #[error("wire timeout")]
    WireTimeout,

    #[error("wire rate limited, retry after {retry_after}s")]
    WireRateLimited { retry_after: u64 },

    #[error("wire forbidden: user blocked the bot")]
    WireForbidden,

    #[error("wire: {0}")]
    Wire(String),

    // ── Store ────────────────────────────────────────────────────────
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a store-layer failure (pool exhaustion, connection loss, a
    /// failed query) without pulling the driver crate into the domain.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Error::StoreUnavailable(err.to_string())
    }

    /// Wrap a wire-layer failure that is not one of the typed kinds.
    pub fn wire(err: impl std::fmt::Display) -> Self {
        Error::Wire(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
