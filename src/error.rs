//! Unified error type for the vibescout daemon — maps internal errors to JSON-RPC codes.

use thiserror::Error;

/// Standard JSON-RPC 2.0 error codes.
const PARSE_ERROR: i32 = -32700;
const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;
/// Application-level server error (implementation-defined).
const SERVER_ERROR: i32 = -32000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing credential for provider {0}")]
    MissingCredential(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("model mismatch: store was written with `{stored}`, current model is `{current}`")]
    ModelMismatch { stored: String, current: String },
    #[error("unknown field in schema: {0}")]
    UnknownField(String),
    #[error("lance error: {0}")]
    Lance(#[from] lancedb::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {0} was cancelled")]
    Cancelled(String),
    #[error("task {0} exceeded its retry budget")]
    RetriesExhausted(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum VibescoutError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("provider error ({provider}): {source}")]
    Provider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl VibescoutError {
    /// JSON-RPC error code for this error variant.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::ParseError(_) => PARSE_ERROR,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::Config(_) | Self::Store(_) | Self::Task(_) | Self::Extract(_) | Self::Provider { .. } | Self::Io(_) => {
                SERVER_ERROR
            }
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Convert to (code, message) pair for DaemonResponse::error.
    pub fn into_rpc(self) -> (i32, String) {
        let code = self.rpc_code();
        (code, self.to_string())
    }
}
