use thiserror::Error;

pub use teddy_realtime_utils::DeviceError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no realtime endpoint or credential configured")]
    MissingCredential,

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed: {}", .0.as_deref().unwrap_or("no reason"))]
    Closed(Option<String>),

    #[error("malformed server message: {0}")]
    Malformed(String),

    #[error("could not cancel response: item \"{0}\" not found")]
    UnknownItem(String),

    #[error("could not cancel response: item \"{0}\" is not an assistant item")]
    NotAssistant(String),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool \"{0}\" has not been added")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("wav encoding failed: {0}")]
    Encode(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("unexpected response: {0}")]
    Response(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("session has been disconnected")]
    Terminated,

    #[error("not connected")]
    NotConnected,

    #[error("recording is only available in manual turn mode")]
    NotManual,
}
