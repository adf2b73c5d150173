//! Avatar cluster: membership reconciliation and the fetch handle lifecycle.
//!
//! Every reconciliation diffs the requested member set against the current one.
//! Removed members hand their handle back to the pool after a backend cancel.
//! Added members take a handle from the pool. Existing members are always
//! cancelled and reloaded, because the render size may have changed and there
//! is no cheap way to tell. Loads wait in a pending queue until geometry is
//! known and are then dispatched in one pass.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use crossbeam_channel::{Receiver, Sender};
use shared::domain::MemberId;
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{Delivery, Fit, ImageBackend, LoadRequest},
    config::MediaSettings,
    error::MediaError,
    geometry::{Bounds, ClusterGeometry, GeometryParams},
    handle::{DecodedImage, FetchHandle, HandleId, HandlePool, HandleState},
    lock_recovering, InvalidateHook, ParticipantLookup,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<MemberId>,
    pub removed: Vec<MemberId>,
    pub existing: Vec<MemberId>,
}

/// Set difference between two member snapshots. Duplicates collapse; `removed`
/// and `existing` follow `current` order, `added` follows `next` order.
pub fn diff_members(current: &[MemberId], next: &[MemberId]) -> MembershipDiff {
    let current_set: HashSet<&MemberId> = current.iter().collect();
    let next_set: HashSet<&MemberId> = next.iter().collect();
    let mut diff = MembershipDiff::default();
    let mut seen = HashSet::new();

    for id in current {
        if !seen.insert(id) {
            continue;
        }
        if next_set.contains(id) {
            diff.existing.push(id.clone());
        } else {
            diff.removed.push(id.clone());
        }
    }
    for id in next {
        if !current_set.contains(id) && seen.insert(id) {
            diff.added.push(id.clone());
        }
    }
    diff
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub diff: MembershipDiff,
    /// Added members the participant lookup did not know.
    pub skipped: Vec<MemberId>,
    pub dispatched: usize,
}

#[derive(Debug, Clone)]
pub struct AvatarView {
    pub member_id: MemberId,
    pub initials: String,
    pub image: Option<DecodedImage>,
    pub state: HandleState,
    pub center: (f32, f32),
}

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub geometry: Option<ClusterGeometry>,
    pub avatars: Vec<AvatarView>,
}

struct ClusterState {
    order: Vec<MemberId>,
    handles: HashMap<MemberId, FetchHandle>,
    initials: HashMap<MemberId, String>,
    pending: Vec<HandleId>,
    pool: HandlePool,
    bounds: Option<Bounds>,
    geometry: Option<ClusterGeometry>,
}

impl ClusterState {
    fn handle_mut(&mut self, id: HandleId) -> Option<&mut FetchHandle> {
        self.handles.values_mut().find(|handle| handle.id() == id)
    }
}

pub struct AvatarCluster {
    lookup: Arc<dyn ParticipantLookup>,
    backend: Arc<dyn ImageBackend>,
    params: GeometryParams,
    state: Mutex<ClusterState>,
    reply_tx: Sender<Delivery>,
    reply_rx: Receiver<Delivery>,
    invalidate: Option<InvalidateHook>,
}

impl AvatarCluster {
    pub fn new(
        lookup: Arc<dyn ParticipantLookup>,
        backend: Arc<dyn ImageBackend>,
        settings: &MediaSettings,
    ) -> Self {
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        Self {
            lookup,
            backend,
            params: GeometryParams::from(settings),
            state: Mutex::new(ClusterState {
                order: Vec::new(),
                handles: HashMap::new(),
                initials: HashMap::new(),
                pending: Vec::new(),
                pool: HandlePool::new(),
                bounds: None,
                geometry: None,
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

    /// Channel the backend answers on. Owners may block or select on it and
    /// feed each message to [`AvatarCluster::apply_delivery`].
    pub fn deliveries(&self) -> Receiver<Delivery> {
        self.reply_rx.clone()
    }

    pub fn reconcile<I, T>(&self, members: I) -> ReconcileResult
    where
        I: IntoIterator<Item = T>,
        T: Into<MemberId>,
    {
        let mut next: Vec<MemberId> = Vec::new();
        let mut seen = HashSet::new();
        for id in members {
            let id = id.into();
            if seen.insert(id.clone()) {
                next.push(id);
            }
        }

        let mut state = lock_recovering(&self.state);
        let diff = diff_members(&state.order, &next);
        let mut to_load = Vec::with_capacity(next.len());
        let mut skipped = Vec::new();

        for removed in &diff.removed {
            state.initials.remove(removed);
            if let Some(mut handle) = state.handles.remove(removed) {
                self.backend.cancel(handle.id());
                handle.cancel();
                state.pool.release(handle);
            }
        }

        for added in &diff.added {
            let Some(member) = self.lookup.participant(added) else {
                debug!(member = %added, "cluster: participant not found, skipping");
                skipped.push(added.clone());
                continue;
            };
            state.initials.insert(added.clone(), member.initials());

            let mut handle = state.pool.acquire();
            if let Some(url) = member.avatar_url {
                handle.set_url(url);
                handle.mark_pending();
                to_load.push(handle.id());
            }
            state.handles.insert(added.clone(), handle);
        }

        for existing in &diff.existing {
            let member = self.lookup.participant(existing);
            if let Some(member) = &member {
                state.initials.insert(existing.clone(), member.initials());
            }
            let Some(handle) = state.handles.get_mut(existing) else {
                continue;
            };
            self.backend.cancel(handle.id());
            handle.cancel();
            // A lookup miss keeps whatever the handle already points at.
            match member.map(|m| m.avatar_url) {
                Some(Some(url)) => handle.set_url(url),
                Some(None) => handle.clear_url(),
                None => {}
            }
            if handle.url().is_some() {
                handle.mark_pending();
                to_load.push(handle.id());
            }
        }

        for stale in std::mem::take(&mut state.pending) {
            self.backend.cancel(stale);
        }
        state.pending = to_load;
        let order: Vec<MemberId> = next
            .into_iter()
            .filter(|id| state.initials.contains_key(id))
            .collect();
        state.order = order;

        let dispatched = self.refresh_geometry(&mut state);
        info!(
            "cluster: reconciled added={} removed={} existing={} skipped={} dispatched={}",
            diff.added.len(),
            diff.removed.len(),
            diff.existing.len(),
            skipped.len(),
            dispatched
        );

        ReconcileResult {
            diff,
            skipped,
            dispatched,
        }
    }

    /// Layout changed. Recomputes geometry and dispatches whatever was waiting
    /// for it.
    pub fn set_bounds(&self, bounds: Bounds) -> usize {
        let mut state = lock_recovering(&self.state);
        state.bounds = Some(bounds);
        self.refresh_geometry(&mut state)
    }

    fn refresh_geometry(&self, state: &mut ClusterState) -> usize {
        state.geometry = state
            .bounds
            .and_then(|bounds| ClusterGeometry::compute(state.order.len(), &bounds, &self.params));
        self.dispatch_pending(state)
    }

    fn dispatch_pending(&self, state: &mut ClusterState) -> usize {
        let Some(geometry) = state.geometry else {
            return 0;
        };
        let size = geometry.pixel_size();
        let transform = geometry.transform();
        let mut dispatched = 0;

        for id in std::mem::take(&mut state.pending) {
            let Some(handle) = state.handle_mut(id) else {
                continue;
            };
            let Some(url) = handle.url().map(str::to_string) else {
                continue;
            };
            let token = handle.begin_request();
            debug!(handle = %id, %url, size, "cluster: dispatching avatar load");
            self.backend.load(LoadRequest {
                token,
                url,
                width: size,
                height: size,
                fit: Fit::CenterCrop,
                rotation_degrees: 0,
                transform: transform.clone(),
                reply: self.reply_tx.clone(),
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Applies one backend answer. Returns `false` for stale deliveries, which
    /// are dropped without complaint.
    pub fn apply_delivery(&self, delivery: Delivery) -> bool {
        let applied = {
            let mut state = lock_recovering(&self.state);
            match state.handle_mut(delivery.token.handle) {
                Some(handle) => {
                    let failure = delivery.outcome.as_ref().err().cloned();
                    match handle.complete(delivery.token, delivery.outcome) {
                        Ok(HandleState::Failed) => {
                            if let Some(failure) = failure {
                                warn!(handle = %delivery.token.handle, "cluster: avatar load failed: {failure}");
                            }
                            true
                        }
                        Ok(_) => true,
                        Err(MediaError::StaleDelivery(id)) => {
                            trace!(handle = id, "cluster: dropping stale delivery");
                            false
                        }
                        Err(_) => false,
                    }
                }
                None => {
                    trace!(handle = %delivery.token.handle, "cluster: delivery for released handle");
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

    /// Applies every delivery already waiting on the reply channel.
    pub fn pump(&self) -> usize {
        let mut applied = 0;
        while let Ok(delivery) = self.reply_rx.try_recv() {
            if self.apply_delivery(delivery) {
                applied += 1;
            }
        }
        applied
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let state = lock_recovering(&self.state);
        let Some(geometry) = state.geometry else {
            return ClusterSnapshot::default();
        };

        let avatars = state
            .order
            .iter()
            .enumerate()
            .map(|(index, member_id)| {
                let handle = state.handles.get(member_id);
                AvatarView {
                    member_id: member_id.clone(),
                    initials: state.initials.get(member_id).cloned().unwrap_or_default(),
                    image: handle.and_then(|h| h.image().cloned()),
                    state: handle.map_or(HandleState::Idle, FetchHandle::state),
                    center: geometry.center_of(index),
                }
            })
            .collect();

        ClusterSnapshot {
            geometry: Some(geometry),
            avatars,
        }
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        lock_recovering(&self.state).order.clone()
    }

    pub fn handle_ids(&self) -> Vec<(MemberId, HandleId)> {
        let state = lock_recovering(&self.state);
        state
            .order
            .iter()
            .filter_map(|id| state.handles.get(id).map(|h| (id.clone(), h.id())))
            .collect()
    }

    pub fn handle_state(&self, member_id: &MemberId) -> Option<HandleState> {
        lock_recovering(&self.state)
            .handles
            .get(member_id)
            .map(FetchHandle::state)
    }

    pub fn pending_len(&self) -> usize {
        lock_recovering(&self.state).pending.len()
    }

    pub fn idle_handles(&self) -> usize {
        lock_recovering(&self.state).pool.idle_len()
    }
}

#[cfg(test)]
#[path = "tests/cluster_tests.rs"]
mod tests;
