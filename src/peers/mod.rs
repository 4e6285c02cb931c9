//! Cluster membership: the consistent hash ring that assigns owners to
//! fingerprints and the pooled clients used to reach them.

use std::sync::{Arc, RwLock};

mod client;
mod picker;

pub use client::Client;
pub(crate) use client::PeerClient;
pub(crate) use picker::PeerPicker;

/// Shared pointer to the current picker snapshot. Readers clone the inner
/// `Arc` under a short-held lock; membership updates publish a whole new
/// picker in its place.
pub(crate) type PickerHandle = Arc<RwLock<Arc<PeerPicker>>>;
