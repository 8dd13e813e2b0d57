use thiserror::Error;

/// Failure of a backend call as seen by the caller of the gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response reached the client (DNS, connect, timeout, cancellation).
    #[error("transport error: no response from server")]
    Transport,
    /// The server rejected the credential after the retry budget ran out.
    #[error("session expired")]
    AuthExpired,
    #[error("request failed with status {0}")]
    RequestFailed(u16),
    #[error("request body could not be encoded: {0}")]
    Encode(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Why an inbound push message was not dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no event kind")]
    MissingKind,
    #[error("unrecognized event kind '{0}'")]
    UnknownKind(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential store format: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(String),
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LlmeetError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("http client: {0}")]
    Client(String),
    #[error("event channel: {0}")]
    Channel(String),
}
