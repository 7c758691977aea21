use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
