//! Message parts and the three-part image encoding.
//!
//! A progressive image travels as exactly three ordered parts: the full image
//! (`image/<subtype>`), a preview (`image/<subtype>+preview`) and a small JSON
//! metadata part (`application/json+imageSize`). Anything else is handed to a
//! generic message handler.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, PartId},
    error::ProtocolError,
};

pub const PART_INDEX_FULL: usize = 0;
pub const PART_INDEX_PREVIEW: usize = 1;
pub const PART_INDEX_INFO: usize = 2;

pub const MIME_IMAGE_PREFIX: &str = "image/";
pub const MIME_PREVIEW_SUFFIX: &str = "+preview";
pub const MIME_INFO: &str = "application/json+imageSize";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub part_id: PartId,
    pub mime_type: String,
    /// Inline body, when the part travels with the message. Large parts are
    /// usually fetched separately through the content store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub parts: Vec<MessagePart>,
}

impl PartId {
    /// `<scheme>:///messages/<message>/parts/<index>`
    pub fn for_message(scheme: &str, message_id: &MessageId, index: usize) -> Self {
        Self(format!("{scheme}:///messages/{message_id}/parts/{index}"))
    }
}

/// Two-bit orientation code carried in the metadata part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Upright,
    UpsideDown,
    /// Turned 90 degrees to the right; rendered with a -90 degree rotation.
    RotatedRight,
    /// Turned 90 degrees to the left; rendered with a +90 degree rotation.
    RotatedLeft,
}

impl Orientation {
    pub fn code(self) -> u8 {
        match self {
            Self::Upright => 0,
            Self::UpsideDown => 1,
            Self::RotatedRight => 2,
            Self::RotatedLeft => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(Self::Upright),
            1 => Ok(Self::UpsideDown),
            2 => Ok(Self::RotatedRight),
            3 => Ok(Self::RotatedLeft),
            other => Err(ProtocolError::InvalidOrientation(other)),
        }
    }

    /// Clockwise rotation, in degrees, that turns the stored pixels upright.
    pub fn rotation_degrees(self) -> i16 {
        match self {
            Self::Upright => 0,
            Self::UpsideDown => 180,
            Self::RotatedRight => -90,
            Self::RotatedLeft => 90,
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Self::RotatedRight | Self::RotatedLeft)
    }
}

/// Maps an EXIF orientation tag onto the wire code. Mirrored variants collapse
/// onto their unmirrored rotation; unknown tags are treated as upright.
pub fn orientation_from_exif(tag: u16) -> Orientation {
    match tag {
        3 | 4 => Orientation::UpsideDown,
        5 | 6 => Orientation::RotatedRight,
        7 | 8 => Orientation::RotatedLeft,
        _ => Orientation::Upright,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub orientation: Orientation,
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize)]
struct ImageInfoWire {
    orientation: i64,
    width: i64,
    height: i64,
}

impl ImageInfo {
    pub fn new(orientation: Orientation, width: u32, height: u32) -> Result<Self, ProtocolError> {
        if width == 0 || height == 0 {
            return Err(ProtocolError::InvalidDimensions {
                width: width.into(),
                height: height.into(),
            });
        }
        Ok(Self {
            orientation,
            width,
            height,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let wire = ImageInfoWire {
            orientation: self.orientation.code().into(),
            width: self.width.into(),
            height: self.height.into(),
        };
        // Serializing three integers into a Vec cannot fail.
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: ImageInfoWire = serde_json::from_slice(bytes)?;
        let orientation = Orientation::from_code(wire.orientation)?;
        let (Ok(width), Ok(height)) = (u32::try_from(wire.width), u32::try_from(wire.height))
        else {
            return Err(ProtocolError::InvalidDimensions {
                width: wire.width,
                height: wire.height,
            });
        };
        Self::new(orientation, width, height)
    }

    /// Natural dimensions once the orientation has been applied.
    pub fn oriented_dimensions(&self) -> (u32, u32) {
        if self.orientation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Borrowed view over a message that matched the three-part image layout.
#[derive(Debug, Clone, Copy)]
pub struct ThreePartImage<'a> {
    message: &'a Message,
}

impl<'a> ThreePartImage<'a> {
    pub fn classify(message: &'a Message) -> Option<Self> {
        let parts = &message.parts;
        let matches = parts.len() == 3
            && parts[PART_INDEX_FULL].mime_type.starts_with(MIME_IMAGE_PREFIX)
            && parts[PART_INDEX_PREVIEW]
                .mime_type
                .starts_with(MIME_IMAGE_PREFIX)
            && parts[PART_INDEX_PREVIEW]
                .mime_type
                .ends_with(MIME_PREVIEW_SUFFIX)
            && parts[PART_INDEX_INFO].mime_type == MIME_INFO;
        matches.then_some(Self { message })
    }

    pub fn try_from_message(message: &'a Message) -> Result<Self, ProtocolError> {
        Self::classify(message).ok_or_else(|| ProtocolError::NotThreePartImage {
            message_id: message.message_id.to_string(),
        })
    }

    pub fn message_id(&self) -> &'a MessageId {
        &self.message.message_id
    }

    pub fn full(&self) -> &'a MessagePart {
        &self.message.parts[PART_INDEX_FULL]
    }

    pub fn preview(&self) -> &'a MessagePart {
        &self.message.parts[PART_INDEX_PREVIEW]
    }

    pub fn info_part(&self) -> &'a MessagePart {
        &self.message.parts[PART_INDEX_INFO]
    }

    pub fn info(&self) -> Result<ImageInfo, ProtocolError> {
        let body = self.info_part().body.as_deref().ok_or_else(|| {
            ProtocolError::MalformedMetadata("metadata part carries no body".to_string())
        })?;
        ImageInfo::decode(body)
    }
}

/// Preview size that fits `max_width` x `max_height`, or `None` when the full
/// image already fits and can double as its own preview.
pub fn preview_dimensions(
    full_width: u32,
    full_height: u32,
    max_width: u32,
    max_height: u32,
) -> Option<(u32, u32)> {
    if full_width <= max_width && full_height <= max_height {
        return None;
    }

    let height_ratio = f64::from(full_height) / f64::from(max_height);
    let width_ratio = f64::from(full_width) / f64::from(max_width);
    if height_ratio > width_ratio {
        let width = (f64::from(full_width) / height_ratio).round() as u32;
        Some((width.max(1), max_height))
    } else {
        let height = (f64::from(full_height) / width_ratio).round() as u32;
        Some((max_width, height.max(1)))
    }
}

/// Assembles the three ordered parts of a progressive image message from
/// already-encoded bytes. A `None` preview reuses the full image bytes.
pub fn compose_three_part(
    scheme: &str,
    message_id: MessageId,
    full_mime: &str,
    full: Vec<u8>,
    preview: Option<Vec<u8>>,
    info: ImageInfo,
) -> Result<Message, ProtocolError> {
    if !full_mime.starts_with(MIME_IMAGE_PREFIX) || full_mime.ends_with(MIME_PREVIEW_SUFFIX) {
        return Err(ProtocolError::NotThreePartImage {
            message_id: message_id.to_string(),
        });
    }

    let preview = preview.unwrap_or_else(|| full.clone());
    let parts = vec![
        MessagePart {
            part_id: PartId::for_message(scheme, &message_id, PART_INDEX_FULL),
            mime_type: full_mime.to_string(),
            body: Some(full),
        },
        MessagePart {
            part_id: PartId::for_message(scheme, &message_id, PART_INDEX_PREVIEW),
            mime_type: format!("{full_mime}{MIME_PREVIEW_SUFFIX}"),
            body: Some(preview),
        },
        MessagePart {
            part_id: PartId::for_message(scheme, &message_id, PART_INDEX_INFO),
            mime_type: MIME_INFO.to_string(),
            body: Some(info.encode()),
        },
    ];

    Ok(Message { message_id, parts })
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
