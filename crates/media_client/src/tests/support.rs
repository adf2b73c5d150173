//! Hand-written fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use image::{Rgba, RgbaImage};
use shared::domain::{Member, MemberId, PartId};

use crate::{
    backend::{Delivery, ImageBackend, LoadRequest},
    error::{LoadFailure, MediaError},
    handle::{DecodedImage, HandleId},
    sync_bridge::{ContentStore, ListenerId, ProgressEvent, ProgressListener},
    ParticipantLookup,
};

#[derive(Debug, Clone)]
pub enum BackendCall {
    Load(LoadRequest),
    Cancel(HandleId),
}

/// Records every call and never answers on its own; tests answer explicitly.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn loads(&self) -> Vec<LoadRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Load(request) => Some(request),
                BackendCall::Cancel(_) => None,
            })
            .collect()
    }

    pub fn cancels(&self) -> Vec<HandleId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Cancel(id) => Some(id),
                BackendCall::Load(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("calls").clear();
    }

    pub fn answer_ok(request: &LoadRequest) {
        request.respond(Ok(test_image(request.width.max(1), request.height.max(1))));
    }

    pub fn answer_err(request: &LoadRequest) {
        request.respond(Err(LoadFailure::Fetch("boom".into())));
    }
}

impl ImageBackend for RecordingBackend {
    fn load(&self, request: LoadRequest) {
        self.calls
            .lock()
            .expect("calls")
            .push(BackendCall::Load(request));
    }

    fn cancel(&self, handle: HandleId) {
        self.calls
            .lock()
            .expect("calls")
            .push(BackendCall::Cancel(handle));
    }
}

pub fn test_image(width: u32, height: u32) -> DecodedImage {
    Arc::new(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])))
}

pub fn delivery_ok(request: &LoadRequest) -> Delivery {
    Delivery {
        token: request.token,
        outcome: Ok(test_image(1, 1)),
    }
}

#[derive(Default)]
pub struct Directory {
    members: Mutex<HashMap<MemberId, Member>>,
}

impl Directory {
    pub fn with(members: &[(&str, &str, Option<&str>)]) -> Arc<Self> {
        let directory = Self::default();
        for (id, name, url) in members {
            directory.upsert(id, name, *url);
        }
        Arc::new(directory)
    }

    pub fn upsert(&self, id: &str, name: &str, url: Option<&str>) {
        self.members.lock().expect("members").insert(
            MemberId::from(id),
            Member {
                member_id: MemberId::from(id),
                display_name: name.to_string(),
                avatar_url: url.map(str::to_string),
            },
        );
    }

    pub fn remove(&self, id: &str) {
        self.members.lock().expect("members").remove(&MemberId::from(id));
    }
}

impl ParticipantLookup for Directory {
    fn participant(&self, member_id: &MemberId) -> Option<Member> {
        self.members.lock().expect("members").get(member_id).cloned()
    }
}

/// In-memory content store. Downloads only complete when a test calls
/// [`MemoryContentStore::finish_download`] or [`MemoryContentStore::fail_download`].
#[derive(Default)]
pub struct MemoryContentStore {
    ready: Mutex<HashMap<PartId, Vec<u8>>>,
    remote: Mutex<HashMap<PartId, Vec<u8>>>,
    listeners: Mutex<HashMap<ListenerId, (PartId, Arc<dyn ProgressListener>)>>,
    next_listener: Mutex<u64>,
    downloads: Mutex<Vec<PartId>>,
    registrations: Mutex<usize>,
    complete_on_download: Mutex<HashSet<PartId>>,
}

impl MemoryContentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_ready(&self, part: &PartId, bytes: Vec<u8>) {
        self.ready.lock().expect("ready").insert(part.clone(), bytes);
    }

    pub fn insert_remote(&self, part: &PartId, bytes: Vec<u8>) {
        self.remote.lock().expect("remote").insert(part.clone(), bytes);
    }

    /// Make `download` finish synchronously for `part`.
    pub fn complete_immediately(&self, part: &PartId) {
        self.complete_on_download
            .lock()
            .expect("complete")
            .insert(part.clone());
    }

    pub fn downloads(&self) -> Vec<PartId> {
        self.downloads.lock().expect("downloads").clone()
    }

    pub fn registrations(&self) -> usize {
        *self.registrations.lock().expect("registrations")
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listeners").len()
    }

    pub fn finish_download(&self, part: &PartId) {
        if let Some(bytes) = self.remote.lock().expect("remote").remove(part) {
            self.insert_ready(part, bytes);
        }
        self.notify(part, ProgressEvent::Completed);
    }

    pub fn fail_download(&self, part: &PartId, reason: &str) {
        self.notify(part, ProgressEvent::Failed(reason.to_string()));
    }

    fn notify(&self, part: &PartId, event: ProgressEvent) {
        let listeners: Vec<Arc<dyn ProgressListener>> = self
            .listeners
            .lock()
            .expect("listeners")
            .values()
            .filter(|(listening, _)| listening == part)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_progress(part, event.clone());
        }
    }
}

impl ContentStore for MemoryContentStore {
    fn is_ready(&self, part: &PartId) -> bool {
        self.ready.lock().expect("ready").contains_key(part)
    }

    fn read(&self, part: &PartId) -> Result<Vec<u8>, MediaError> {
        self.ready
            .lock()
            .expect("ready")
            .get(part)
            .cloned()
            .ok_or_else(|| MediaError::Content(format!("{part} not resident")))
    }

    fn download(&self, part: &PartId) -> Result<(), MediaError> {
        self.downloads.lock().expect("downloads").push(part.clone());
        if !self.remote.lock().expect("remote").contains_key(part) {
            return Err(MediaError::Content(format!("{part} unknown")));
        }
        if self
            .complete_on_download
            .lock()
            .expect("complete")
            .contains(part)
        {
            self.finish_download(part);
        }
        Ok(())
    }

    fn register_progress_listener(
        &self,
        part: &PartId,
        listener: Arc<dyn ProgressListener>,
    ) -> ListenerId {
        *self.registrations.lock().expect("registrations") += 1;
        let mut next = self.next_listener.lock().expect("next");
        *next += 1;
        let id = ListenerId(*next);
        self.listeners
            .lock()
            .expect("listeners")
            .insert(id, (part.clone(), listener));
        id
    }

    fn unregister_progress_listener(&self, _part: &PartId, listener: ListenerId) {
        self.listeners.lock().expect("listeners").remove(&listener);
    }
}
