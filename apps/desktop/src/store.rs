use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread,
};

use media_client::{
    sync_bridge::{ListenerId, ProgressListener},
    ContentStore, MediaError, ProgressEvent,
};
use shared::{domain::PartId, protocol::Message};
use tracing::debug;

#[derive(Default)]
struct Inner {
    resident: HashMap<PartId, Vec<u8>>,
    deferred: HashMap<PartId, Vec<u8>>,
    listeners: HashMap<ListenerId, (PartId, Arc<dyn ProgressListener>)>,
    next_listener: u64,
}

/// Holds message parts in memory. Deferred parts only become resident after a
/// download, which completes on a worker thread like a real transfer would.
#[derive(Clone, Default)]
pub struct LocalContentStore {
    inner: Arc<Mutex<Inner>>,
}

impl LocalContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, message: &Message, defer_full: bool) {
        let mut inner = self.lock();
        for (index, part) in message.parts.iter().enumerate() {
            let Some(body) = part.body.clone() else {
                continue;
            };
            if defer_full && index == shared::protocol::PART_INDEX_FULL {
                inner.deferred.insert(part.part_id.clone(), body);
            } else {
                inner.resident.insert(part.part_id.clone(), body);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn finish(&self, part: &PartId, bytes: Vec<u8>) {
        let listeners: Vec<Arc<dyn ProgressListener>> = {
            let mut inner = self.lock();
            inner.resident.insert(part.clone(), bytes);
            inner
                .listeners
                .values()
                .filter(|(listening, _)| listening == part)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        debug!(%part, "store: download finished");
        for listener in listeners {
            listener.on_progress(part, ProgressEvent::Completed);
        }
    }
}

impl ContentStore for LocalContentStore {
    fn is_ready(&self, part: &PartId) -> bool {
        self.lock().resident.contains_key(part)
    }

    fn read(&self, part: &PartId) -> Result<Vec<u8>, MediaError> {
        self.lock()
            .resident
            .get(part)
            .cloned()
            .ok_or_else(|| MediaError::Content(format!("{part} is not resident")))
    }

    fn download(&self, part: &PartId) -> Result<(), MediaError> {
        let Some(bytes) = self.lock().deferred.remove(part) else {
            return Err(MediaError::Content(format!("{part} has no remote copy")));
        };
        let store = self.clone();
        let part = part.clone();
        thread::spawn(move || store.finish(&part, bytes));
        Ok(())
    }

    fn register_progress_listener(
        &self,
        part: &PartId,
        listener: Arc<dyn ProgressListener>,
    ) -> ListenerId {
        let mut inner = self.lock();
        inner.next_listener += 1;
        let id = ListenerId(inner.next_listener);
        inner.listeners.insert(id, (part.clone(), listener));
        id
    }

    fn unregister_progress_listener(&self, _part: &PartId, listener: ListenerId) {
        self.lock().listeners.remove(&listener);
    }
}
