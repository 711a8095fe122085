//! Error type shared by every relay component.

/// Errors raised while negotiating a call, reading a stream, or talking to
/// the same-origin API.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} responded with status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Credential response did not contain a token")]
    Credential,
    #[error("Microphone unavailable: {0}")]
    Media(String),
    #[error("Peer connection failed: {0}")]
    Peer(String),
    #[error("Data channel failed: {0}")]
    Channel(String),
    #[error("Search failed: {0}")]
    Search(String),
    #[error("Response contained no text")]
    EmptyResponse,
    #[error("A call is already active")]
    CallAlreadyActive,
    #[error("Stream buffer exceeded {0} bytes without a line break")]
    StreamOverflow(usize),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
