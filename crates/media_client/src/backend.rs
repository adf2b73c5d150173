//! Contract between the core and whatever fetches and decodes images.
//!
//! Requests carry their own reply channel; the backend answers every request
//! exactly once with a [`Delivery`] tagged with the request token, on whatever
//! thread it likes. Owners drain their channel and drop deliveries whose token
//! has been superseded.

use crossbeam_channel::Sender;

use crate::{
    error::LoadFailure,
    handle::{DecodedImage, HandleId, RequestToken},
    transform::ShapeTransform,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fit {
    /// Scale to cover the target box and crop the overflow.
    CenterCrop,
    /// Scale to fit inside the target box.
    CenterInside,
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub token: RequestToken,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    /// Clockwise rotation in degrees; one of 0, 90, -90, 180.
    pub rotation_degrees: i16,
    pub transform: ShapeTransform,
    pub reply: Sender<Delivery>,
}

impl LoadRequest {
    /// De-duplication key for a backend cache. Includes the transform identity
    /// so differently shaped renders of one url never collide.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}x{}|{:?}|{}|{}",
            self.url,
            self.width,
            self.height,
            self.fit,
            self.rotation_degrees,
            self.transform.key()
        )
    }

    pub fn respond(&self, outcome: Result<DecodedImage, LoadFailure>) {
        // A dropped receiver means the owner is gone; nothing left to notify.
        let _ = self.reply.send(Delivery {
            token: self.token,
            outcome,
        });
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub token: RequestToken,
    pub outcome: Result<DecodedImage, LoadFailure>,
}

pub trait ImageBackend: Send + Sync {
    /// Starts an asynchronous load. Must not block and must eventually answer
    /// on `request.reply`.
    fn load(&self, request: LoadRequest);

    /// Best-effort cancellation of whatever is in flight for `handle`. Handle
    /// ids are unique per process, so one backend can serve several owners.
    fn cancel(&self, handle: HandleId);
}
