use thiserror::Error;

/// Failure talking to a physical plug. Never fatal to the daemon.
#[derive(Debug, Clone, Error)]
#[error("device {plug} at {address} unavailable: {reason}")]
pub struct DeviceError {
    pub plug: String,
    pub address: String,
    pub reason: String,
}

impl DeviceError {
    pub fn new(plug: &str, address: &str, reason: impl Into<String>) -> Self {
        DeviceError {
            plug: plug.to_string(),
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plug '{0}' not found")]
    NotFound(String),

    #[error("access to plug '{plug}' denied for user '{user}'")]
    Forbidden { plug: String, user: String },

    #[error("plug '{plug}' is not in use by '{user}'")]
    NotInUse { plug: String, user: String },

    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceError),

    /// Not produced today; reserve is idempotent rather than conflicting.
    #[error("conflict on plug '{0}'")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PLUGS is not valid JSON: {0}")]
    MalformedPlugs(#[from] serde_json::Error),

    #[error("PLUGS must be a JSON object mapping plug id to address")]
    PlugsNotAnObject,

    #[error("{name} has an invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },
}
