//! Shared wiring for the end-to-end tests: trees joined by a simulated
//! hub, with a keychain on every producer.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use nametree::Namespace;
use nametree_core::Name;
use nametree_crypto::Ed25519KeyChain;
use nametree_face::sim::SimHub;

/// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Attaches a fresh hub face to the tree's root.
pub fn link(tree: &mut Namespace, hub: &SimHub) {
    init_tracing();
    let face = hub.face();
    let root = tree.root();
    tree.set_face(root, Rc::new(RefCell::new(face)));
}

/// A deterministic producer keychain.
pub fn keychain() -> Rc<Ed25519KeyChain> {
    Rc::new(Ed25519KeyChain::from_secret(
        [0x21_u8; 32],
        Name::parse("/keys/producer"),
    ))
}

/// Runs several event-loop turns on each tree, interleaved, without
/// advancing the clock.
pub fn pump(trees: &mut [&mut Namespace]) {
    for _ in 0..6 {
        for tree in trees.iter_mut() {
            tree.process_events();
        }
    }
}

/// Advances the hub clock in `step_ms` slices, pumping between slices.
pub fn pump_for(hub: &SimHub, trees: &mut [&mut Namespace], total_ms: u64, step_ms: u64) {
    let mut elapsed = 0;
    pump(trees);
    while elapsed < total_ms {
        hub.advance_millis(step_ms);
        elapsed += step_ms;
        pump(trees);
    }
}
