#![forbid(unsafe_code)]

//! Reactive state foundation for Weft.
//!
//! Provides [`ReactiveStore`], a wrapper around a statically-shaped record
//! that intercepts field writes, optionally transforms values before they
//! are committed, and synchronously notifies subscribers when a watched
//! field changes.
//!
//! # Role in Weft
//! `weft-reactive` gives feature controllers a single source of truth for
//! small pieces of UI state. It knows nothing about rendering or frames;
//! controllers typically react to a notification by scheduling a render
//! task on the frame scheduler (`weft-frame`).
//!
//! # How it fits in the system
//! Stores are created once per logical domain at startup and live for the
//! process lifetime. Notification is purely synchronous and in-line with
//! the write call stack; coalescing of downstream render work is the
//! scheduler's job, not the store's.

pub mod error;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use record::Record;
pub use store::{ReactiveStore, StoreConfig, Subscription};
