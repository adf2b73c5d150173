use std::time::Duration;

use shared::error::ProtocolError;
use thiserror::Error;

/// Why a single backend load did not produce an image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("no fetcher handles url {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("image load failed: {0}")]
    LoadFailure(#[from] LoadFailure),
    #[error("content for {part} not ready after {waited:?}")]
    Timeout { part: String, waited: Duration },
    #[error("malformed image metadata: {0}")]
    MalformedMetadata(String),
    #[error("message {0} is not a three-part image")]
    NotThreePartImage(String),
    #[error("stale delivery for handle {0}")]
    StaleDelivery(u64),
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
    #[error("content store error: {0}")]
    Content(String),
}

impl From<ProtocolError> for MediaError {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::NotThreePartImage { message_id } => Self::NotThreePartImage(message_id),
            other => Self::MalformedMetadata(other.to_string()),
        }
    }
}

impl From<MediaError> for LoadFailure {
    fn from(value: MediaError) -> Self {
        match value {
            MediaError::LoadFailure(failure) => failure,
            MediaError::UnsupportedUrl(url) => Self::Unsupported(url),
            other => Self::Fetch(other.to_string()),
        }
    }
}
