use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::domain::{Member, MemberId};

pub mod backend;
pub mod cluster;
pub mod config;
pub mod content;
pub mod error;
pub mod geometry;
pub mod handle;
pub mod progressive;
pub mod sync_bridge;
pub mod task_backend;
pub mod transform;

pub use backend::{Delivery, Fit, ImageBackend, LoadRequest};
pub use cluster::{AvatarCluster, AvatarView, ClusterSnapshot, MembershipDiff, ReconcileResult};
pub use config::MediaSettings;
pub use error::{LoadFailure, MediaError};
pub use handle::{DecodedImage, FetchHandle, HandleId, HandlePool, HandleState, RequestToken};
pub use progressive::{
    render_size, JobPhase, ProgressiveImageController, RenderSize, Showing, SlotView,
};
pub use sync_bridge::{ContentStore, ProgressEvent, SyncBridge};
pub use task_backend::TaskBackend;
pub use transform::ShapeTransform;

/// Resolves member ids to display records. A miss is not an error; the member
/// is simply left out of the cluster.
pub trait ParticipantLookup: Send + Sync {
    fn participant(&self, member_id: &MemberId) -> Option<Member>;
}

/// Redraw trigger, invoked after state locks are released.
pub type InvalidateHook = Arc<dyn Fn() + Send + Sync>;

/// Every guarded structure in this crate is consistent between statements, so
/// a panic on another thread does not leave it half-written.
pub(crate) fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
