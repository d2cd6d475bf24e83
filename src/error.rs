use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The frame was not a well-formed protocol array.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid signature on event {0}")]
    InvalidSignature(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key error: {0}")]
    Key(#[from] secp256k1::Error),

    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("transport error: {0}")]
    Transport(String),
}
