use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PennsieveError {
    #[error("Pennsieve request failed: {0}")]
    Http(String),

    #[error("Pennsieve returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request was not authorized")]
    #[diagnostic(help("check the API token and secret of the active profile"))]
    Unauthorized,

    #[error("missing credentials: an API token and secret, or a JWT, are required")]
    #[diagnostic(help("run `ps-profile create` or set PENNSIEVE_API_TOKEN / PENNSIEVE_API_SECRET"))]
    MissingCredentials,

    #[error("unexpected response from Pennsieve: {0}")]
    Json(String),

    #[error("{0}")]
    Validation(String),

    #[error("Pennsieve rejected the request: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("object must be created on the platform before {0}")]
    NotCreated(String),

    #[error("{0} is not available")]
    Unsupported(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("profile '{0}' does not exist")]
    UnknownProfile(String),

    #[error("profile '{0}' already exists")]
    ProfileExists(String),

    #[error("profile name '{0}' is reserved for the system")]
    ReservedProfile(String),

    #[error("invalid key: '{0}'")]
    #[diagnostic(help("see `ps-profile keys` for the available keys"))]
    InvalidKey(String),

    #[error("{profile}: {key} not set")]
    KeyNotSet { profile: String, key: String },

    #[error("aborted")]
    Aborted,

    #[error("agent error: {0}")]
    Agent(String),

    #[error("agent not compatible: found version {found}, need version {required}")]
    AgentVersion { found: String, required: String },

    #[error("annotation file error: {0}")]
    AnnotationFile(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
