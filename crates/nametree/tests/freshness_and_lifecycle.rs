//! Freshness boundaries, staleness transitions, digest-named Interests and
//! registration lifecycle.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use nametree::{Namespace, NamespaceState};
use nametree_codec::{Data, Interest, MetaInfo};
use nametree_core::{Name, NameComponent};
use nametree_face::sim::SimHub;
use nametree_face::{Face, FaceEvent};

use common::{link, pump};

fn fresh_data(uri: &str, content: &[u8], freshness_ms: u64) -> Data {
    let mut data = Data::new(Name::parse(uri), content.to_vec());
    let mut meta = MetaInfo::default();
    meta.set_freshness_period(Some(Duration::from_millis(freshness_ms)));
    data.set_meta_info(meta);
    data
}

fn producer_with_data(hub: &SimHub, prefix: &str, uri: &str, freshness_ms: u64) -> Namespace {
    let mut producer = Namespace::new(Name::parse(prefix));
    link(&mut producer, hub);
    let root = producer.root();
    producer
        .register_prefix(root, None, None)
        .expect("producer face is set");
    producer.process_events();
    let node = producer.node(&Name::parse(uri)).expect("descendant");
    producer
        .set_data(node, fresh_data(uri, b"cached", freshness_ms))
        .expect("accepts");
    producer
}

#[test]
fn must_be_fresh_is_answered_only_inside_the_freshness_window() {
    let hub = SimHub::new();
    let mut producer = producer_with_data(&hub, "/f", "/f/doc", 500);

    let mut early = hub.face();
    let mut fresh_interest = Interest::new(Name::parse("/f/doc"));
    fresh_interest.set_must_be_fresh(true);
    fresh_interest.set_lifetime(Some(Duration::from_millis(100)));

    hub.advance_millis(400);
    early.express_interest(fresh_interest.clone());
    producer.process_events();
    assert!(matches!(early.poll(), Some(FaceEvent::Data { .. })));

    // At exactly the deadline the cache no longer answers; the Interest
    // waits in the pending table and then times out.
    hub.advance_millis(100);
    let mut late = hub.face();
    late.express_interest(fresh_interest);
    producer.process_events();
    assert!(late.poll().is_none());
    hub.advance_millis(100);
    producer.process_events();
    assert!(matches!(late.poll(), Some(FaceEvent::Timeout { .. })));

    // Without the freshness requirement the stale cache still answers.
    let mut relaxed = hub.face();
    relaxed.express_interest(Interest::new(Name::parse("/f/doc")));
    producer.process_events();
    assert!(matches!(relaxed.poll(), Some(FaceEvent::Data { .. })));
}

#[test]
fn elapsed_freshness_surfaces_object_ready_but_stale() {
    let hub = SimHub::new();
    let mut producer = producer_with_data(&hub, "/f", "/f/doc", 500);

    let mut consumer = Namespace::new(Name::parse("/f"));
    link(&mut consumer, &hub);
    let node = consumer.node(&Name::parse("/f/doc")).expect("descendant");
    consumer.object_needed(node, false).expect("face is set");
    pump(&mut [&mut producer, &mut consumer]);
    assert_eq!(consumer.state(node), NamespaceState::ObjectReady);

    hub.advance_millis(600);

    // A relaxed access reports staleness and keeps the object.
    let states: Rc<RefCell<Vec<NamespaceState>>> = Rc::new(RefCell::new(Vec::new()));
    let log = states.clone();
    consumer.add_on_state_changed(node, move |_, _, _, state| log.borrow_mut().push(state));
    hub.take_expressed_interests();

    consumer.object_needed(node, false).expect("no refetch needed");
    assert_eq!(
        states.borrow().as_slice(),
        &[NamespaceState::ObjectReadyButStale]
    );
    assert!(hub.take_expressed_interests().is_empty());
    assert!(consumer.object(node).is_some());

    // A fresh access re-expresses after reporting staleness.
    consumer.object_needed(node, true).expect("face is set");
    assert_eq!(consumer.state(node), NamespaceState::InterestExpressed);
    let interests = hub.take_expressed_interests();
    assert_eq!(interests.len(), 1);
    assert!(interests[0].must_be_fresh());
}

#[test]
fn digest_named_interest_is_answered_by_the_exact_packet() {
    let hub = SimHub::new();
    let mut producer = producer_with_data(&hub, "/f", "/f/doc", 500);

    let node = producer.node(&Name::parse("/f/doc")).expect("descendant");
    let full_name = producer
        .data(node)
        .expect("cached data")
        .full_name()
        .expect("digest computes");

    let mut consumer_face = hub.face();
    consumer_face.express_interest(Interest::new(full_name));
    producer.process_events();
    match consumer_face.poll() {
        Some(FaceEvent::Data { data, .. }) => assert_eq!(data.content(), b"cached"),
        other => panic!("expected the exact packet, got {other:?}"),
    }

    // A wrong digest is never answered by the cache.
    let wrong = Name::parse("/f/doc").child(NameComponent::from_implicit_digest([0_u8; 32]));
    let mut unlucky = hub.face();
    let mut interest = Interest::new(wrong);
    interest.set_lifetime(Some(Duration::from_millis(100)));
    unlucky.express_interest(interest);
    producer.process_events();
    assert!(unlucky.poll().is_none());
}

#[test]
fn removed_callbacks_no_longer_fire() {
    let mut ns = Namespace::new(Name::parse("/c"));
    let node = ns.node(&Name::parse("/c/x")).expect("descendant");

    let count = Rc::new(RefCell::new(0_usize));
    let log = count.clone();
    let id = ns.add_on_state_changed(node, move |_, _, _, _| *log.borrow_mut() += 1);

    ns.set_object(node, nametree::NamespaceObject::Blob(Vec::new()));
    assert_eq!(*count.borrow(), 1);

    ns.remove_callback(node, id);
    ns.set_object(node, nametree::NamespaceObject::Blob(Vec::new()));
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn clear_face_stops_incoming_interest_delivery() {
    let hub = SimHub::new();
    let mut producer = producer_with_data(&hub, "/f", "/f/doc", 500);
    let root = producer.root();

    let mut consumer_face = hub.face();
    consumer_face.express_interest(Interest::new(Name::parse("/f/doc")));
    producer.process_events();
    assert!(matches!(consumer_face.poll(), Some(FaceEvent::Data { .. })));

    producer.clear_face(root);

    let mut second = hub.face();
    let mut interest = Interest::new(Name::parse("/f/doc"));
    interest.set_lifetime(Some(Duration::from_millis(100)));
    second.express_interest(interest);
    producer.process_events();
    assert!(second.poll().is_none());
    hub.advance_millis(100);
    assert!(matches!(second.poll(), Some(FaceEvent::Timeout { .. })));
}
