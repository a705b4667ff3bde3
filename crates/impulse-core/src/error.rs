//! Error types shared by every Impulse crate.

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, ImpulseError>;

#[derive(Debug, thiserror::Error)]
pub enum ImpulseError {
    /// Malformed trigger/stream/category definitions. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single trigger or opportunity capability failed.
    #[error("Execution failed for '{source_name}': {reason}")]
    Execution { source_name: String, reason: String },

    /// The stream allocator rejected a mutation.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ImpulseError {
    /// Shorthand for an execution failure.
    pub fn execution(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error should stop the process rather than a single cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Toml(_))
    }
}
