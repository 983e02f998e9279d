use std::path::PathBuf;

/// The tagged union of everything that can abort loading a single plugin.
/// Every variant is fatal *for that plugin only* — the registry never lets
/// one propagate past `try_load`.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no manifest found at {0}")]
    ConfigMissing(PathBuf),

    #[error("{0}")]
    RequirementError(String),

    #[error("missing secret files:\n{}", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join("\n"))]
    MissingSecretError(Vec<PathBuf>),

    #[error("{0}")]
    InvalidPluginType(String),

    #[error("plugin did not confirm launch within {0:?}")]
    LaunchTimeout(std::time::Duration),

    #[error("could not register skill path: {0}")]
    NamespaceLockError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

/// The broker's own error kind, surfaced to a calling child as the RPC's
/// error payload rather than logged locally.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("arguments given for non-callable target at {0}")]
    ArgumentMismatch(String),

    #[error("result is not serializable: {0}")]
    NotSerializable(String),
}
