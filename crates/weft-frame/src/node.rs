#![forbid(unsafe_code)]

//! Stable node identity for identity-addressed scheduling.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a UI node, used to deduplicate scheduler tasks.
///
/// The scheduler tracks these in a side-table and never learns about node
/// destruction on its own; hosts must call
/// [`cancel_node`](crate::FrameScheduler::cancel_node) when the node is
/// torn down.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh, process-unique identity.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a host-assigned raw identity.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}
