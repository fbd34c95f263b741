#![forbid(unsafe_code)]

//! Error types for store construction.

use thiserror::Error;

/// Errors raised when building a [`ReactiveStore`](crate::ReactiveStore).
///
/// Construction is the only fallible operation in this crate; reads and
/// writes never fail (listener panics are surfaced to the writer, not
/// converted to errors).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A watched field is not part of the record's field population.
    ///
    /// The store rejects the configuration outright rather than silently
    /// dropping the unknown field; a watch set that can never fire is a
    /// wiring bug in the caller.
    #[error("watched field is not part of the record: {field}")]
    UnknownWatchedField {
        /// Debug rendering of the offending field identifier.
        field: String,
    },
}
