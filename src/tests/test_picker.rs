use std::collections::HashMap;
use std::sync::Arc;

use crate::common::fingerprint;
use crate::config::{BehaviorConfig, PeerInfo};
use crate::peers::{PeerClient, PeerPicker};

fn client(address: &str) -> Arc<PeerClient> {
    PeerClient::new(
        PeerInfo { address: address.to_string(), data_center: String::new(), is_self: false },
        &BehaviorConfig::default(),
    )
    .expect("building peer client")
}

fn picker(addresses: &[&str]) -> PeerPicker {
    PeerPicker::new(addresses.iter().map(|a| client(a)).collect(), 512)
}

fn keys(count: usize) -> Vec<u64> {
    (0..count)
        .map(|i| fingerprint("picker_test", &format!("account:{i}")))
        .collect()
}

#[tokio::test]
async fn empty_picker_has_no_owner() {
    let picker = PeerPicker::empty();
    assert!(picker.owner(12345).is_none());
    assert_eq!(picker.peer_count(), 0);
}

#[tokio::test]
async fn owner_is_deterministic_across_builds() {
    let first = picker(&["10.0.0.1:1050", "10.0.0.2:1050", "10.0.0.3:1050"]);
    let second = picker(&["10.0.0.1:1050", "10.0.0.2:1050", "10.0.0.3:1050"]);

    for key in keys(500) {
        let a = first.owner(key).expect("owner").info().address.clone();
        let b = second.owner(key).expect("owner").info().address.clone();
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn peer_order_does_not_change_ownership() {
    let forward = picker(&["10.0.0.1:1050", "10.0.0.2:1050", "10.0.0.3:1050"]);
    let shuffled = picker(&["10.0.0.3:1050", "10.0.0.1:1050", "10.0.0.2:1050"]);

    for key in keys(500) {
        assert_eq!(
            forward.owner(key).expect("owner").info().address,
            shuffled.owner(key).expect("owner").info().address,
        );
    }
}

#[tokio::test]
async fn keys_spread_over_all_peers() {
    let picker = picker(&["10.0.0.1:1050", "10.0.0.2:1050", "10.0.0.3:1050"]);
    let mut counts: HashMap<String, usize> = HashMap::new();

    for key in keys(9_000) {
        let owner = picker.owner(key).expect("owner").info().address.clone();
        *counts.entry(owner).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    for (address, count) in counts {
        assert!(count > 900, "{address} owns only {count} of 9000 keys");
        assert!(count < 6_000, "{address} owns {count} of 9000 keys");
    }
}

#[tokio::test]
async fn removing_a_peer_remaps_only_its_keys() {
    let addresses = ["10.0.0.1:1050", "10.0.0.2:1050", "10.0.0.3:1050", "10.0.0.4:1050"];
    let full = picker(&addresses);
    let without_last = picker(&addresses[..3]);

    let keys = keys(2_000);
    let mut moved = 0;
    for key in &keys {
        let before = full.owner(*key).expect("owner").info().address.clone();
        let after = without_last.owner(*key).expect("owner").info().address.clone();
        if before == addresses[3] {
            moved += 1;
        } else {
            // Keys the departed peer never owned must not move.
            assert_eq!(before, after);
        }
    }

    // Roughly a quarter of the keyspace belonged to the removed peer.
    assert!(moved > 200, "only {moved} of 2000 keys belonged to the removed peer");
    assert!(moved < 1_000, "{moved} of 2000 keys belonged to the removed peer");
}

#[tokio::test]
async fn self_peer_is_discoverable() {
    let me = PeerClient::new(
        PeerInfo { address: "10.0.0.1:1050".to_string(), data_center: String::new(), is_self: true },
        &BehaviorConfig::default(),
    )
    .expect("building peer client");
    let other = client("10.0.0.2:1050");

    let picker = PeerPicker::new(vec![me, other], 128);
    assert_eq!(picker.self_peer().expect("self peer").info().address, "10.0.0.1:1050");
    assert_eq!(picker.peer_count(), 2);
}
