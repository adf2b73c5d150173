//! Recyclable fetch handles and the free-list that owns idle ones.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use image::RgbaImage;

use crate::error::{LoadFailure, MediaError};

pub type DecodedImage = Arc<RgbaImage>;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one dispatched request. A delivery only applies when its token
/// still matches the handle's current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub handle: HandleId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug)]
pub struct FetchHandle {
    id: HandleId,
    generation: u64,
    url: Option<String>,
    image: Option<DecodedImage>,
    state: HandleState,
}

impl PartialEq for FetchHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FetchHandle {}

impl FetchHandle {
    fn new(id: HandleId) -> Self {
        Self {
            id,
            generation: 0,
            url: None,
            image: None,
            state: HandleState::Idle,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        self.image.as_ref()
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn token(&self) -> RequestToken {
        RequestToken {
            handle: self.id,
            generation: self.generation,
        }
    }

    /// Points the handle at `url`. A different url drops the previous result so
    /// another member's image can never show through.
    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        if self.url.as_deref() != Some(url.as_str()) {
            self.image = None;
        }
        self.url = Some(url);
    }

    /// Drops the url and any image loaded from it. The handle goes idle.
    pub(crate) fn clear_url(&mut self) {
        self.url = None;
        self.image = None;
        self.state = HandleState::Idle;
    }

    /// Invalidates any outstanding request and marks the handle as waiting for
    /// a (re)load.
    pub(crate) fn mark_pending(&mut self) {
        self.generation += 1;
        self.state = HandleState::Pending;
    }

    /// Invalidates any outstanding request without queuing another one.
    pub(crate) fn cancel(&mut self) {
        self.generation += 1;
        if self.state == HandleState::Pending {
            self.state = if self.image.is_some() {
                HandleState::Loaded
            } else {
                HandleState::Idle
            };
        }
    }

    /// Mints the token for the request about to be issued.
    pub(crate) fn begin_request(&mut self) -> RequestToken {
        self.generation += 1;
        self.state = HandleState::Pending;
        self.token()
    }

    pub(crate) fn complete(
        &mut self,
        token: RequestToken,
        outcome: Result<DecodedImage, LoadFailure>,
    ) -> Result<HandleState, MediaError> {
        if token != self.token() || self.state != HandleState::Pending {
            return Err(MediaError::StaleDelivery(token.handle.0));
        }

        match outcome {
            Ok(image) => {
                self.image = Some(image);
                self.state = HandleState::Loaded;
            }
            Err(_) => {
                self.image = None;
                self.state = HandleState::Failed;
            }
        }
        Ok(self.state)
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.url = None;
        self.image = None;
        self.state = HandleState::Idle;
    }
}

/// Free-list of idle handles.
///
/// Fresh ids come from one process-wide sequence, so handles from different
/// pools stay distinct on a backend they share. Handles move out on
/// [`HandlePool::acquire`] and back in on [`HandlePool::release`]; reuse is
/// first-in first-out.
#[derive(Debug, Default)]
pub struct HandlePool {
    minted: u64,
    free: VecDeque<FetchHandle>,
}

impl HandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> FetchHandle {
        if let Some(handle) = self.free.pop_front() {
            return handle;
        }
        self.minted += 1;
        FetchHandle::new(HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn release(&mut self, mut handle: FetchHandle) {
        handle.reset();
        self.free.push_back(handle);
    }

    pub fn idle_len(&self) -> usize {
        self.free.len()
    }

    /// Number of distinct handles this pool has ever created.
    pub fn minted(&self) -> u64 {
        self.minted
    }
}
