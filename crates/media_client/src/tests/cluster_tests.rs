use super::*;
use crate::{
    test_support::{Directory, RecordingBackend},
    transform::ShapeTransform,
};

use std::sync::atomic::{AtomicUsize, Ordering};

fn ids(raw: &[&str]) -> Vec<MemberId> {
    raw.iter().map(|id| MemberId::from(*id)).collect()
}

fn directory() -> Arc<Directory> {
    Directory::with(&[
        ("alice", "alice", Some("https://avatars.test/alice.png")),
        ("bob", "Bob", Some("https://avatars.test/bob.png")),
        ("carol", "Carol", Some("https://avatars.test/carol.png")),
        ("dave", "Dave", Some("https://avatars.test/dave.png")),
        ("nourl", "Nadia", None),
    ])
}

fn cluster() -> (AvatarCluster, Arc<RecordingBackend>, Arc<Directory>) {
    let backend = RecordingBackend::new();
    let directory = directory();
    let cluster = AvatarCluster::new(directory.clone(), backend.clone(), &MediaSettings::default());
    (cluster, backend, directory)
}

fn handle_of(cluster: &AvatarCluster, member: &str) -> HandleId {
    cluster
        .handle_ids()
        .into_iter()
        .find(|(id, _)| id.as_str() == member)
        .map(|(_, handle)| handle)
        .expect("member has a handle")
}

#[test]
fn diff_splits_members_into_three_sets() {
    let diff = diff_members(&ids(&["a", "b", "c"]), &ids(&["c", "d", "b", "d"]));
    assert_eq!(diff.added, ids(&["d"]));
    assert_eq!(diff.removed, ids(&["a"]));
    assert_eq!(diff.existing, ids(&["b", "c"]));
}

#[test]
fn loads_wait_for_bounds_and_then_dispatch_once() {
    let (cluster, backend, _directory) = cluster();

    let result = cluster.reconcile(["alice", "bob"]);
    assert_eq!(result.dispatched, 0);
    assert_eq!(cluster.pending_len(), 2);
    assert!(backend.loads().is_empty());
    assert!(cluster.snapshot().geometry.is_none());

    assert_eq!(cluster.set_bounds(Bounds::new(40.0, 40.0)), 2);
    assert_eq!(cluster.pending_len(), 0);
    assert_eq!(cluster.set_bounds(Bounds::new(40.0, 40.0)), 0);

    let loads = backend.loads();
    assert_eq!(loads.len(), 2);
    for load in &loads {
        assert_eq!(load.transform, ShapeTransform::MULTI_AVATAR);
        assert_eq!(load.fit, Fit::CenterCrop);
        assert_eq!((load.width, load.height), (24, 24));
    }
}

#[test]
fn a_lone_member_uses_the_single_avatar_shape() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    let result = cluster.reconcile(["alice"]);
    assert_eq!(result.dispatched, 1);

    let load = &backend.loads()[0];
    assert_eq!(load.transform, ShapeTransform::SINGLE_AVATAR);
    assert_eq!((load.width, load.height), (38, 38));
    assert_eq!(load.url, "https://avatars.test/alice.png");
}

#[test]
fn members_follow_the_latest_requested_set() {
    let (cluster, _backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));

    cluster.reconcile(["alice", "bob", "carol"]);
    let result = cluster.reconcile(["carol", "dave", "bob", "dave"]);

    assert_eq!(result.diff.removed, ids(&["alice"]));
    assert_eq!(result.diff.added, ids(&["dave"]));
    assert_eq!(cluster.member_ids(), ids(&["carol", "dave", "bob"]));
}

#[test]
fn removed_handles_are_recycled_for_new_members() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice", "bob"]);
    let alice = handle_of(&cluster, "alice");
    let bob = handle_of(&cluster, "bob");
    assert_ne!(alice, bob);

    cluster.reconcile(["bob"]);
    assert!(backend.cancels().contains(&alice));
    assert_eq!(cluster.idle_handles(), 1);

    cluster.reconcile(["bob", "carol"]);
    assert_eq!(handle_of(&cluster, "carol"), alice);
    assert_eq!(cluster.idle_handles(), 0);

    let handles: Vec<HandleId> = cluster.handle_ids().into_iter().map(|(_, h)| h).collect();
    assert_eq!(handles.len(), 2);
    assert_ne!(handles[0], handles[1]);
}

#[test]
fn late_answers_for_removed_members_are_dropped() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice", "bob"]);
    let loads = backend.loads();

    cluster.reconcile(["bob"]);
    for load in &loads {
        RecordingBackend::answer_ok(load);
    }

    // Only bob's answer survives; alice's arrived after her handle was released.
    assert_eq!(cluster.pump(), 0, "bob was reloaded too, so his first answer is stale");
    assert_eq!(cluster.handle_state(&MemberId::from("bob")), Some(HandleState::Pending));

    let reload = backend.loads().last().cloned().expect("bob reload");
    RecordingBackend::answer_ok(&reload);
    assert_eq!(cluster.pump(), 1);
    assert_eq!(cluster.handle_state(&MemberId::from("bob")), Some(HandleState::Loaded));
}

#[test]
fn existing_members_are_cancelled_and_reloaded() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice"]);
    let first = backend.loads()[0].clone();
    let alice = handle_of(&cluster, "alice");

    let result = cluster.reconcile(["alice"]);
    assert_eq!(result.diff.existing, ids(&["alice"]));
    assert_eq!(result.dispatched, 1);
    assert_eq!(backend.cancels(), vec![alice]);
    assert_eq!(backend.loads().len(), 2);

    assert!(!cluster.apply_delivery(crate::test_support::delivery_ok(&first)));
    assert!(cluster.apply_delivery(crate::test_support::delivery_ok(&backend.loads()[1])));
}

#[test]
fn repeated_reconciles_without_bounds_dispatch_each_member_once() {
    let (cluster, backend, _directory) = cluster();
    cluster.reconcile(["alice", "bob"]);
    cluster.reconcile(["alice", "bob"]);
    cluster.reconcile(["bob", "alice"]);

    cluster.set_bounds(Bounds::new(80.0, 40.0));
    let loads = backend.loads();
    assert_eq!(loads.len(), 2);
    assert_ne!(loads[0].token.handle, loads[1].token.handle);
}

#[test]
fn an_existing_member_picks_up_a_changed_avatar_url() {
    let (cluster, backend, directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice"]);

    directory.upsert("alice", "Alice", Some("https://avatars.test/alice-2.png"));
    cluster.reconcile(["alice"]);

    assert_eq!(
        backend.loads().last().map(|load| load.url.clone()),
        Some("https://avatars.test/alice-2.png".to_string())
    );
    assert_eq!(cluster.snapshot().avatars[0].initials, "A");
}

#[test]
fn a_removed_avatar_url_drops_the_image_and_stops_reloading() {
    let (cluster, backend, directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice"]);
    RecordingBackend::answer_ok(&backend.loads()[0]);
    assert_eq!(cluster.pump(), 1);
    assert!(cluster.snapshot().avatars[0].image.is_some());

    directory.upsert("alice", "Alice", None);
    backend.clear();
    let result = cluster.reconcile(["alice"]);
    assert_eq!(result.dispatched, 0);
    assert!(backend.loads().is_empty());

    let avatar = &cluster.snapshot().avatars[0];
    assert_eq!(avatar.state, HandleState::Idle);
    assert!(avatar.image.is_none());
    assert_eq!(avatar.initials, "A");

    cluster.reconcile(["alice"]);
    assert!(backend.loads().is_empty());
}

#[test]
fn an_existing_member_missing_from_the_lookup_keeps_its_avatar() {
    let (cluster, backend, directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice"]);
    directory.remove("alice");
    backend.clear();

    cluster.reconcile(["alice"]);
    let loads = backend.loads();
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].url, "https://avatars.test/alice.png");
}

#[test]
fn unknown_members_are_skipped() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));

    let result = cluster.reconcile(["ghost", "alice"]);
    assert_eq!(result.skipped, ids(&["ghost"]));
    assert_eq!(cluster.member_ids(), ids(&["alice"]));
    assert_eq!(backend.loads().len(), 1);
    assert_eq!(backend.loads()[0].transform, ShapeTransform::SINGLE_AVATAR);
}

#[test]
fn members_without_an_avatar_show_initials_only() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    let result = cluster.reconcile(["nourl"]);

    assert_eq!(result.dispatched, 0);
    assert!(backend.loads().is_empty());
    let snapshot = cluster.snapshot();
    assert_eq!(snapshot.avatars.len(), 1);
    assert_eq!(snapshot.avatars[0].initials, "N");
    assert_eq!(snapshot.avatars[0].state, HandleState::Idle);
    assert!(snapshot.avatars[0].image.is_none());
}

#[test]
fn failures_leave_the_initials_visible() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["bob"]);

    RecordingBackend::answer_err(&backend.loads()[0]);
    assert_eq!(cluster.pump(), 1);

    let avatar = &cluster.snapshot().avatars[0];
    assert_eq!(avatar.state, HandleState::Failed);
    assert_eq!(avatar.initials, "B");
    assert!(avatar.image.is_none());
}

#[test]
fn snapshot_lays_members_out_in_order() {
    let (cluster, backend, _directory) = cluster();
    cluster.set_bounds(Bounds::new(80.0, 40.0));
    cluster.reconcile(["alice", "bob"]);
    RecordingBackend::answer_ok(&backend.loads()[1]);
    cluster.pump();

    let snapshot = cluster.snapshot();
    let geometry = snapshot.geometry.expect("geometry");
    assert_eq!(geometry.count, 2);
    let members: Vec<&str> = snapshot.avatars.iter().map(|a| a.member_id.as_str()).collect();
    assert_eq!(members, vec!["alice", "bob"]);
    assert_eq!(snapshot.avatars[0].center, geometry.center_of(0));
    assert_eq!(snapshot.avatars[1].center, geometry.center_of(1));
    assert!(snapshot.avatars[0].image.is_none());
    assert!(snapshot.avatars[1].image.is_some());
}

#[test]
fn zero_sized_bounds_keep_loads_pending() {
    let (cluster, backend, _directory) = cluster();
    cluster.reconcile(["alice"]);
    assert_eq!(cluster.set_bounds(Bounds::new(10.0, 10.0).with_padding(5.0, 5.0, 5.0, 5.0)), 0);
    assert_eq!(cluster.pending_len(), 1);
    assert!(backend.loads().is_empty());
}

#[test]
fn applied_deliveries_trigger_a_redraw() {
    let backend = RecordingBackend::new();
    let redraws = Arc::new(AtomicUsize::new(0));
    let counter = redraws.clone();
    let cluster = AvatarCluster::new(directory(), backend.clone(), &MediaSettings::default())
        .with_invalidate(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    cluster.set_bounds(Bounds::new(40.0, 40.0));
    cluster.reconcile(["alice"]);

    let load = backend.loads()[0].clone();
    RecordingBackend::answer_ok(&load);
    RecordingBackend::answer_ok(&load);
    assert_eq!(cluster.pump(), 1);
    assert_eq!(redraws.load(Ordering::SeqCst), 1);
}
