use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::common::Fingerprint;
use crate::peers::PeerClient;

struct RingPoint {
    position: u64,
    peer: u32,
}

/// Consistent hash ring mapping fingerprints to owning peers.
///
/// Pickers are immutable snapshots: membership changes build a whole new
/// picker and publish it atomically, so readers never take a lock. Every node
/// computes positions with the same fixed hasher, which is what makes the
/// peers agree on ownership.
pub(crate) struct PeerPicker {
    ring: Vec<RingPoint>,
    peers: Vec<Arc<PeerClient>>,
}

impl PeerPicker {
    /// Picker with no peers. Lookups return `None` and the caller treats
    /// itself as the owner, which is the single-node behavior.
    pub(crate) fn empty() -> Self {
        Self { ring: Vec::new(), peers: Vec::new() }
    }

    /// Build a ring with `replicas` virtual nodes per peer.
    pub(crate) fn new(peers: Vec<Arc<PeerClient>>, replicas: usize) -> Self {
        let mut ring = Vec::with_capacity(peers.len().saturating_mul(replicas));
        for (index, peer) in peers.iter().enumerate() {
            for replica in 0..replicas {
                ring.push(RingPoint {
                    position: ring_position(&peer.info().address, replica),
                    peer: index as u32,
                });
            }
        }
        // Position collisions between different peers are broken by address,
        // so every node resolves them identically.
        ring.sort_unstable_by(|a, b| {
            a.position.cmp(&b.position).then_with(|| {
                peers[a.peer as usize]
                    .info()
                    .address
                    .cmp(&peers[b.peer as usize].info().address)
            })
        });
        Self { ring, peers }
    }

    /// The peer whose first clockwise virtual node covers `fingerprint`.
    pub(crate) fn owner(&self, fingerprint: Fingerprint) -> Option<&Arc<PeerClient>> {
        if self.ring.is_empty() {
            return None;
        }
        let point = lookup_position(fingerprint);
        let index = self.ring.partition_point(|entry| entry.position < point);
        let entry = &self.ring[index % self.ring.len()];
        Some(&self.peers[entry.peer as usize])
    }

    pub(crate) fn peers(&self) -> &[Arc<PeerClient>] {
        &self.peers
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub(crate) fn self_peer(&self) -> Option<&Arc<PeerClient>> {
        self.peers.iter().find(|peer| peer.is_self())
    }
}

fn ring_position(address: &str, replica: usize) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(address.as_bytes());
    hasher.write_u8(0);
    hasher.write_usize(replica);
    hasher.finish()
}

/// Remix the fingerprint before the ring lookup so counter keys and virtual
/// node positions do not share a distribution.
fn lookup_position(fingerprint: Fingerprint) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(fingerprint);
    hasher.finish()
}
