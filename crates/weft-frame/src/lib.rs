#![forbid(unsafe_code)]

//! Frame-batched task scheduling for Weft.
//!
//! Provides [`FrameScheduler`], which coalesces many same-frame update
//! requests into one measured read pass and one mutation pass, preventing
//! redundant work and layout thrashing.
//!
//! # Role in Weft
//! Controllers never mutate shared output directly; they register read and
//! write tasks keyed by a string or by a [`NodeId`]. The scheduler defers
//! execution to the host's next paint opportunity, runs all reads before
//! all writes, and keeps only the last task registered per key.
//!
//! # How it fits in the system
//! The scheduler owns no frame source. A host loop installs a frame
//! requester callback, and calls [`FrameScheduler::run_frame`] once per
//! paint opportunity after the scheduler has signaled demand. Everything is
//! single-threaded and cooperative.

pub mod node;
pub mod scheduler;

pub use node::NodeId;
pub use scheduler::{FlushSignal, FlushStats, FrameScheduler};
