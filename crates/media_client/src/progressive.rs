//! Progressive delivery of three-part image messages.
//!
//! Binding a message to a slot starts a job. If the full image is already
//! resident it is loaded directly and the preview is never requested.
//! Otherwise the preview loads first and the full image is requested only once
//! the preview has arrived. A failed preview stops the job on a placeholder. A
//! failed full image leaves the preview on screen with the placeholder
//! indicator raised.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use crossbeam_channel::{Receiver, Sender};
use shared::{
    domain::{MessageId, SlotId},
    protocol::{ImageInfo, Message, ThreePartImage},
};
use tracing::{debug, trace, warn};

use crate::{
    backend::{Delivery, Fit, ImageBackend, LoadRequest},
    config::MediaSettings,
    error::{LoadFailure, MediaError},
    handle::{DecodedImage, FetchHandle, HandlePool, HandleState},
    lock_recovering,
    sync_bridge::ContentStore,
    transform::ShapeTransform,
    InvalidateHook,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Preview,
    Full,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Showing {
    Nothing,
    Preview,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: i16,
}

/// Orients the natural size, then clamps it to `max_width` keeping the aspect
/// ratio.
pub fn render_size(info: &ImageInfo, max_width: u32) -> RenderSize {
    let (width, height) = info.oriented_dimensions();
    let max_width = max_width.max(1);
    let (width, height) = if width <= max_width {
        (width, height)
    } else {
        let scaled = (f64::from(max_width) * f64::from(height) / f64::from(width)).round();
        (max_width, (scaled as u32).max(1))
    };
    RenderSize {
        width,
        height,
        rotation_degrees: info.orientation.rotation_degrees(),
    }
}

#[derive(Debug, Clone)]
pub struct SlotView {
    pub message_id: MessageId,
    pub size: RenderSize,
    pub phase: JobPhase,
    pub showing: Showing,
    pub image: Option<DecodedImage>,
    pub placeholder: bool,
}

struct LoadJob {
    message_id: MessageId,
    max_width: u32,
    size: RenderSize,
    full_url: String,
    handle: FetchHandle,
    phase: JobPhase,
    showing: Showing,
    image: Option<DecodedImage>,
    placeholder: bool,
}

impl LoadJob {
    /// Finished on a failure; a rebind should try again.
    fn failed(&self) -> bool {
        self.phase == JobPhase::Done && self.placeholder
    }
}

/// Parsed metadata per message. Oldest entry goes first once full.
struct InfoCache {
    capacity: usize,
    order: VecDeque<MessageId>,
    entries: HashMap<MessageId, ImageInfo>,
}

impl InfoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, message_id: &MessageId) -> Option<ImageInfo> {
        self.entries.get(message_id).copied()
    }

    fn insert(&mut self, message_id: MessageId, info: ImageInfo) {
        if self.entries.insert(message_id.clone(), info).is_some() {
            return;
        }
        self.order.push_back(message_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct ControllerState {
    info_cache: InfoCache,
    jobs: HashMap<SlotId, LoadJob>,
    pool: HandlePool,
}

pub struct ProgressiveImageController {
    backend: Arc<dyn ImageBackend>,
    content: Arc<dyn ContentStore>,
    transform: ShapeTransform,
    state: Mutex<ControllerState>,
    reply_tx: Sender<Delivery>,
    reply_rx: Receiver<Delivery>,
    invalidate: Option<InvalidateHook>,
}

impl ProgressiveImageController {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        content: Arc<dyn ContentStore>,
        settings: &MediaSettings,
    ) -> Self {
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            content,
            transform: ShapeTransform::rounded(settings.image_corner_radius),
            state: Mutex::new(ControllerState {
                info_cache: InfoCache::new(settings.memory_cache_entries),
                jobs: HashMap::new(),
                pool: HandlePool::new(),
            }),
            reply_tx,
            reply_rx,
            invalidate: None,
        }
    }

    pub fn with_invalidate(mut self, hook: InvalidateHook) -> Self {
        self.invalidate = Some(hook);
        self
    }

    pub fn deliveries(&self) -> Receiver<Delivery> {
        self.reply_rx.clone()
    }

    /// Parses and caches the metadata part ahead of binding.
    pub fn prefetch_info(&self, message: &Message) -> Result<ImageInfo, MediaError> {
        let image = ThreePartImage::try_from_message(message)?;
        let mut state = lock_recovering(&self.state);
        Self::cached_info(&mut state, &image)
    }

    fn cached_info(
        state: &mut ControllerState,
        image: &ThreePartImage<'_>,
    ) -> Result<ImageInfo, MediaError> {
        if let Some(info) = state.info_cache.get(image.message_id()) {
            return Ok(info);
        }
        let info = image.info().map_err(|err| {
            warn!(message_id = %image.message_id(), "progressive: unreadable image metadata: {err}");
            MediaError::MalformedMetadata(err.to_string())
        })?;
        state.info_cache.insert(image.message_id().clone(), info);
        Ok(info)
    }

    /// Binds `message` to `slot`. Messages that are not three-part images, or
    /// whose metadata cannot be read, are rejected so the caller can fall back
    /// to generic handling.
    ///
    /// Binding the message a slot already shows at the same width keeps the
    /// running job, unless that job ended on a failure.
    pub fn bind(
        &self,
        slot: SlotId,
        message: &Message,
        max_width: u32,
    ) -> Result<JobPhase, MediaError> {
        let image = ThreePartImage::try_from_message(message)?;
        let mut state = lock_recovering(&self.state);
        let info = Self::cached_info(&mut state, &image)?;

        if let Some(job) = state.jobs.get(&slot) {
            if &job.message_id == image.message_id()
                && job.max_width == max_width
                && !job.failed()
            {
                return Ok(job.phase);
            }
        }
        if let Some(previous) = state.jobs.remove(&slot) {
            self.retire(&mut state.pool, previous);
        }

        let size = render_size(&info, max_width);
        let full_url = image.full().part_id.to_string();
        let (phase, url) = if self.content.is_ready(&image.full().part_id) {
            (JobPhase::Full, full_url.clone())
        } else {
            (JobPhase::Preview, image.preview().part_id.to_string())
        };

        let mut handle = state.pool.acquire();
        handle.set_url(url.clone());
        self.issue(&mut handle, url, size);
        debug!(
            slot = slot.0,
            message_id = %image.message_id(),
            ?phase,
            width = size.width,
            height = size.height,
            "progressive: bound image"
        );

        state.jobs.insert(
            slot,
            LoadJob {
                message_id: image.message_id().clone(),
                max_width,
                size,
                full_url,
                handle,
                phase,
                showing: Showing::Nothing,
                image: None,
                placeholder: true,
            },
        );
        Ok(phase)
    }

    /// The slot's view was recycled; drops its job and any request in flight.
    pub fn release(&self, slot: SlotId) -> bool {
        let mut state = lock_recovering(&self.state);
        match state.jobs.remove(&slot) {
            Some(job) => {
                self.retire(&mut state.pool, job);
                true
            }
            None => false,
        }
    }

    fn retire(&self, pool: &mut HandlePool, mut job: LoadJob) {
        if job.phase != JobPhase::Done {
            self.backend.cancel(job.handle.id());
        }
        job.handle.cancel();
        pool.release(job.handle);
    }

    fn issue(&self, handle: &mut FetchHandle, url: String, size: RenderSize) {
        let token = handle.begin_request();
        self.backend.load(LoadRequest {
            token,
            url,
            width: size.width,
            height: size.height,
            fit: Fit::CenterInside,
            rotation_degrees: size.rotation_degrees,
            transform: self.transform.clone(),
            reply: self.reply_tx.clone(),
        });
    }

    pub fn apply_delivery(&self, delivery: Delivery) -> bool {
        let applied = {
            let mut state = lock_recovering(&self.state);
            let Some(job) = state
                .jobs
                .values_mut()
                .find(|job| job.handle.id() == delivery.token.handle)
            else {
                trace!(handle = %delivery.token.handle, "progressive: delivery for released job");
                return false;
            };

            let failure = delivery.outcome.as_ref().err().cloned();
            match job.handle.complete(delivery.token, delivery.outcome) {
                Ok(outcome) => {
                    self.advance(job, outcome, failure);
                    true
                }
                Err(_) => {
                    trace!(handle = %delivery.token.handle, "progressive: dropping stale delivery");
                    false
                }
            }
        };

        if applied {
            if let Some(invalidate) = &self.invalidate {
                invalidate();
            }
        }
        applied
    }

    fn advance(
        &self,
        job: &mut LoadJob,
        outcome: HandleState,
        failure: Option<LoadFailure>,
    ) {
        let loaded = outcome == HandleState::Loaded;
        match (job.phase, loaded) {
            (JobPhase::Preview, true) => {
                job.image = job.handle.image().cloned();
                job.showing = Showing::Preview;
                job.placeholder = false;
                job.phase = JobPhase::Full;
                let url = job.full_url.clone();
                job.handle.set_url(url.clone());
                self.issue(&mut job.handle, url, job.size);
                debug!(message_id = %job.message_id, "progressive: preview shown, loading full image");
            }
            (JobPhase::Preview, false) => {
                job.placeholder = true;
                job.phase = JobPhase::Done;
                warn!(
                    message_id = %job.message_id,
                    reason = ?failure,
                    "progressive: preview failed, not loading full image"
                );
            }
            (JobPhase::Full, true) => {
                job.image = job.handle.image().cloned();
                job.showing = Showing::Full;
                job.placeholder = false;
                job.phase = JobPhase::Done;
            }
            (JobPhase::Full, false) => {
                job.placeholder = true;
                job.phase = JobPhase::Done;
                warn!(
                    message_id = %job.message_id,
                    reason = ?failure,
                    "progressive: full image failed, keeping preview"
                );
            }
            (JobPhase::Done, _) => {}
        }
    }

    pub fn pump(&self) -> usize {
        let mut applied = 0;
        while let Ok(delivery) = self.reply_rx.try_recv() {
            if self.apply_delivery(delivery) {
                applied += 1;
            }
        }
        applied
    }

    pub fn slot_view(&self, slot: SlotId) -> Option<SlotView> {
        let state = lock_recovering(&self.state);
        state.jobs.get(&slot).map(|job| SlotView {
            message_id: job.message_id.clone(),
            size: job.size,
            phase: job.phase,
            showing: job.showing,
            image: job.image.clone(),
            placeholder: job.placeholder,
        })
    }

    pub fn cached_info_len(&self) -> usize {
        lock_recovering(&self.state).info_cache.len()
    }
}

#[cfg(test)]
#[path = "tests/progressive_tests.rs"]
mod tests;
