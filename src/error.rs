use thiserror::Error;

/// Problems found while resolving configuration, before any document is
/// touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported engine: {0} (known: groq, gemini, echo)")]
    UnsupportedEngine(String),

    #[error("no credentials for engine {engine}: set one of {}", vars.join(", "))]
    MissingCredentials { engine: String, vars: Vec<String> },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Request shapes a backend can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    Batch,
    Sequential,
    Invoke,
}

impl std::fmt::Display for CallShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallShape::Batch => "batch",
            CallShape::Sequential => "sequential",
            CallShape::Invoke => "invoke",
        };
        f.write_str(s)
    }
}

/// Errors from a translation backend. The orchestrator retries all of them.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend does not support the {0} call shape")]
    Unsupported(CallShape),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("backend responded with error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse backend response: {0}")]
    Parse(String),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("response has no usable ids for the request ({0})")]
    IdentifierMismatch(String),

    #[error("no call shape succeeded (tried: {tried})")]
    Exhausted { tried: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => BackendError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => BackendError::RequestFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Parse(err.to_string())
    }
}
