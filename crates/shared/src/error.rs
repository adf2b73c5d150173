use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed image metadata: {0}")]
    MalformedMetadata(String),
    #[error("message {message_id} is not a three-part image")]
    NotThreePartImage { message_id: String },
    #[error("invalid orientation code {0}; expected 0..=3")]
    InvalidOrientation(i64),
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedMetadata(value.to_string())
    }
}
