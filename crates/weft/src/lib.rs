#![forbid(unsafe_code)]

//! Weft public facade crate.
//!
//! Re-exports the two infrastructure primitives feature controllers build
//! on: the selective-notification [`ReactiveStore`] and the two-phase
//! [`FrameScheduler`]. The intended wiring:
//!
//! 1. A controller mutates a store field.
//! 2. The store notifies subscribed controllers synchronously.
//! 3. A notified controller enqueues a write task on the scheduler, keyed
//!    by its container.
//! 4. The scheduler coalesces all writes for the frame and flushes them in
//!    one tick, after any read tasks.

// --- Reactive re-exports ---------------------------------------------------

pub use weft_reactive::{ReactiveStore, Record, StoreConfig, StoreError, Subscription};

// --- Frame re-exports ------------------------------------------------------

pub use weft_frame::{FlushSignal, FlushStats, FrameScheduler, NodeId};

/// Convenience imports for application code.
pub mod prelude {
    pub use crate::{FrameScheduler, NodeId, ReactiveStore, Record, StoreConfig};
}
