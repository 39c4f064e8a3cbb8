use thiserror::Error;

/// Failures decoding or encoding push-channel envelopes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Envelope is missing the `type` discriminator")]
    MissingType,

    #[error("Unknown envelope type: {0}")]
    UnknownType(String),
}
