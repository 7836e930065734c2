//! Producer-side mediation, decryption, validation and registration
//! behavior over the simulated network.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use nametree::{Namespace, NamespaceState, NamespaceValidateState};
use nametree_codec::{Data, Interest};
use nametree_core::Name;
use nametree_crypto::{Ed25519Validator, XorDecryptor};
use nametree_face::sim::SimHub;
use nametree_face::Face;

use common::{keychain, link, pump};

#[test]
fn pending_interest_is_satisfied_before_state_callbacks() {
    let hub = SimHub::new();
    let mut producer = Namespace::new(Name::parse("/p"));
    link(&mut producer, &hub);
    let root = producer.root();
    producer
        .register_prefix(root, None, None)
        .expect("face is set");
    producer.process_events();

    // The Interest arrives before any Data exists and waits in the table.
    let mut consumer_face = hub.face();
    consumer_face.express_interest(Interest::new(Name::parse("/p/foo")));
    producer.process_events();
    hub.take_sent_data();

    // When the callback fires, the Data must already have left the face.
    let sent_first: Rc<RefCell<Option<bool>>> = Rc::new(RefCell::new(None));
    let node = producer.node(&Name::parse("/p/foo")).expect("descendant");
    let observed = sent_first.clone();
    let hub_probe = hub.clone();
    producer.add_on_state_changed(node, move |_ns, _subscriber, _changed, state| {
        if state == NamespaceState::DataReceived && observed.borrow().is_none() {
            let sent = hub_probe.take_sent_data();
            *observed.borrow_mut() = Some(sent.contains(&Name::parse("/p/foo")));
        }
    });

    producer
        .set_data(node, Data::new(Name::parse("/p/foo"), b"answer".to_vec()))
        .expect("accepts");

    assert_eq!(*sent_first.borrow(), Some(true));
    match consumer_face.poll() {
        Some(nametree_face::FaceEvent::Data { data, .. }) => {
            assert_eq!(data.content(), b"answer")
        }
        other => panic!("expected the buffered interest to be satisfied, got {other:?}"),
    }
}

#[test]
fn inherited_decryptor_runs_before_deserialization() {
    let hub = SimHub::new();
    let decryptor = XorDecryptor { key: 0x3C };

    let mut producer = Namespace::new(Name::parse("/enc"));
    link(&mut producer, &hub);
    let producer_root = producer.root();
    producer
        .register_prefix(producer_root, None, None)
        .expect("face is set");
    producer.process_events();
    let node = producer.node(&Name::parse("/enc/doc")).expect("descendant");
    producer
        .set_data(
            node,
            Data::new(Name::parse("/enc/doc"), decryptor.apply(b"secret body")),
        )
        .expect("accepts");

    let mut consumer = Namespace::new(Name::parse("/enc"));
    link(&mut consumer, &hub);
    let consumer_root = consumer.root();
    consumer.set_decryptor(consumer_root, Rc::new(decryptor));

    let target = consumer.node(&Name::parse("/enc/doc")).expect("descendant");
    consumer.object_needed(target, false).expect("face is set");
    pump(&mut [&mut producer, &mut consumer]);

    assert_eq!(consumer.state(target), NamespaceState::ObjectReady);
    assert_eq!(
        consumer.object(target).and_then(|o| o.as_blob()),
        Some(&b"secret body"[..])
    );
}

#[test]
fn decryption_failure_is_terminal_with_a_message() {
    let hub = SimHub::new();

    let mut producer = Namespace::new(Name::parse("/enc"));
    link(&mut producer, &hub);
    let producer_root = producer.root();
    producer
        .register_prefix(producer_root, None, None)
        .expect("face is set");
    producer.process_events();
    let node = producer.node(&Name::parse("/enc/bad")).expect("descendant");
    // Empty content is undecryptable for the test decryptor.
    producer
        .set_data(node, Data::new(Name::parse("/enc/bad"), Vec::new()))
        .expect("accepts");

    let mut consumer = Namespace::new(Name::parse("/enc"));
    link(&mut consumer, &hub);
    let consumer_root = consumer.root();
    consumer.set_decryptor(consumer_root, Rc::new(XorDecryptor { key: 1 }));

    let target = consumer.node(&Name::parse("/enc/bad")).expect("descendant");
    consumer.object_needed(target, false).expect("face is set");
    pump(&mut [&mut producer, &mut consumer]);

    assert_eq!(consumer.state(target), NamespaceState::DecryptionError);
    assert!(consumer
        .error_message(target)
        .expect("message retained")
        .contains("empty ciphertext"));
    assert!(consumer.object(target).is_none());
}

#[test]
fn inherited_validator_tracks_signature_quality() {
    let hub = SimHub::new();
    let chain = keychain();

    let mut producer = Namespace::new(Name::parse("/v"));
    link(&mut producer, &hub);
    let producer_root = producer.root();
    producer.set_key_chain(producer_root, chain.clone());
    producer
        .register_prefix(producer_root, None, None)
        .expect("face is set");
    producer.process_events();

    // One properly signed packet, one unsigned.
    let good = producer.node(&Name::parse("/v/good")).expect("descendant");
    producer
        .serialize_object(good, nametree::NamespaceObject::Blob(b"ok".to_vec()))
        .expect("signs");
    let bad = producer.node(&Name::parse("/v/bad")).expect("descendant");
    producer
        .set_data(bad, Data::new(Name::parse("/v/bad"), b"ok".to_vec()))
        .expect("accepts");

    let mut consumer = Namespace::new(Name::parse("/v"));
    link(&mut consumer, &hub);
    let consumer_root = consumer.root();
    consumer.set_validator(
        consumer_root,
        Rc::new(Ed25519Validator::new(chain.verifying_key())),
    );

    let good_target = consumer.node(&Name::parse("/v/good")).expect("descendant");
    let bad_target = consumer.node(&Name::parse("/v/bad")).expect("descendant");
    consumer.object_needed(good_target, false).expect("face is set");
    consumer.object_needed(bad_target, false).expect("face is set");
    pump(&mut [&mut producer, &mut consumer]);

    assert_eq!(
        consumer.validate_state(good_target),
        NamespaceValidateState::ValidateSuccess
    );
    assert_eq!(
        consumer.validate_state(bad_target),
        NamespaceValidateState::ValidateFailure
    );
    // Validation is independent of deserialization; both objects are ready.
    assert_eq!(consumer.state(good_target), NamespaceState::ObjectReady);
    assert_eq!(consumer.state(bad_target), NamespaceState::ObjectReady);
}

#[test]
fn registration_failure_reaches_the_callback() {
    let hub = SimHub::new();
    hub.reject_registrations(true);

    let mut producer = Namespace::new(Name::parse("/p"));
    link(&mut producer, &hub);
    let root = producer.root();

    let failure: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let log = failure.clone();
    producer
        .register_prefix(
            root,
            Some(Box::new(move |_ns, _node, reason| {
                *log.borrow_mut() = Some(reason);
            })),
            None,
        )
        .expect("face is set");
    producer.process_events();

    assert!(failure
        .borrow()
        .as_deref()
        .expect("failure reported")
        .contains("rejected"));
}

#[test]
fn signing_error_is_captured_as_node_state() {
    struct RefusingKeyChain;
    impl nametree_crypto::KeyChain for RefusingKeyChain {
        fn sign(&self, _data: &mut Data) -> Result<(), nametree_crypto::SigningError> {
            Err(nametree_crypto::SigningError::KeyFailure(
                "hardware token unplugged".to_string(),
            ))
        }
        fn default_certificate_name(&self) -> Name {
            Name::parse("/keys/refusing")
        }
    }

    let mut producer = Namespace::new(Name::parse("/p"));
    let root = producer.root();
    producer.set_key_chain(root, Rc::new(RefusingKeyChain));

    let node = producer.node(&Name::parse("/p/doc")).expect("descendant");
    producer
        .serialize_object(node, nametree::NamespaceObject::Blob(b"x".to_vec()))
        .expect("captured as state, not an error");

    assert_eq!(producer.state(node), NamespaceState::SigningError);
    assert!(producer
        .error_message(node)
        .expect("message retained")
        .contains("hardware token unplugged"));
    assert!(producer.data(node).is_none());
}
