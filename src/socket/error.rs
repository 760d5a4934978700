use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket is closed")]
    SocketClosed,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_websockets::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
