#![forbid(unsafe_code)]

//! Reactive store with selective, synchronous change notification.
//!
//! # Design
//!
//! [`ReactiveStore<T>`] wraps a [`Record`] in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). Every write goes through a single
//! [`set`](ReactiveStore::set) entry point: the optional transform runs
//! first, the result is committed, and — when the field is watched — all
//! live subscribers are notified in registration order before `set`
//! returns.
//!
//! Writes to a watched field notify **unconditionally**. The store never
//! compares the incoming value against the current one; two consecutive
//! writes of the same value produce two notification passes.
//!
//! # Performance
//!
//! | Operation     | Complexity                  |
//! |---------------|-----------------------------|
//! | `get()`       | O(1) + one value clone      |
//! | `set()`       | O(S) where S = subscribers  |
//! | `subscribe()` | O(1) amortized              |
//!
//! # Failure Modes
//!
//! - **Listener panic**: the remaining listeners in the same notification
//!   pass still run; the first panic payload is re-raised to the caller of
//!   `set` once the pass completes. The store's state is already committed
//!   at that point.
//! - **Re-entrant transform**: the transform runs while the store's
//!   interior is borrowed. A transform that reads or writes the same store
//!   will panic; transforms must be pure value mappings.
//! - **Subscriber leak**: a [`Subscription`] guard stored indefinitely
//!   keeps its callback alive. Dead entries are pruned lazily during
//!   notification.

use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};
use tracing::{debug, info_span};
use web_time::Instant;

use crate::error::StoreError;
use crate::record::Record;

/// A subscriber callback stored as a strong `Rc` inside the guard, handed
/// to the store as `Weak`. Listeners take no payload; they re-read the
/// store if they need current values.
type ListenerRc = Rc<dyn Fn()>;
type ListenerWeak = Weak<dyn Fn()>;

type TransformFn<T> =
    Box<dyn Fn(<T as Record>::Field, <T as Record>::Value) -> <T as Record>::Value>;

/// Configuration for [`ReactiveStore::new`].
///
/// Recognized options are exactly the watch set and the transform; there is
/// no other configuration surface.
pub struct StoreConfig<T: Record> {
    watched: Vec<T::Field>,
    transform: Option<TransformFn<T>>,
}

impl<T: Record> StoreConfig<T> {
    /// Empty configuration: nothing watched, no transform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watched: Vec::new(),
            transform: None,
        }
    }

    /// Add `field` to the watch set.
    #[must_use]
    pub fn watch(mut self, field: T::Field) -> Self {
        self.watched.push(field);
        self
    }

    /// Add every field in `fields` to the watch set.
    #[must_use]
    pub fn watch_all(mut self, fields: impl IntoIterator<Item = T::Field>) -> Self {
        self.watched.extend(fields);
        self
    }

    /// Install a transform applied to every write — watched or not —
    /// before the value is committed.
    #[must_use]
    pub fn transform(
        mut self,
        f: impl Fn(T::Field, T::Value) -> T::Value + 'static,
    ) -> Self {
        self.transform = Some(Box::new(f));
        self
    }
}

impl<T: Record> Default for StoreConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> std::fmt::Debug for StoreConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("watched", &self.watched)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

/// Shared interior for [`ReactiveStore<T>`].
struct StoreInner<T: Record> {
    state: T,
    version: u64,
    watched: HashSet<T::Field>,
    transform: Option<TransformFn<T>>,
    /// Subscribers stored as weak references, in registration order.
    /// Dead entries are pruned on notify.
    subscribers: Vec<ListenerWeak>,
}

/// A shared record with opt-in, synchronous change notification.
///
/// Cloning a `ReactiveStore` creates a new handle to the **same** inner
/// state — both handles see the same values and share subscribers.
///
/// # Invariants
///
/// 1. A read of any field returns the most recently committed
///    (post-transform) value.
/// 2. A write is a single atomic step in program order:
///    transform → commit → (if watched) notify-all.
/// 3. Subscribers are notified in registration order, with no payload.
/// 4. Watched-field writes notify unconditionally; equal values are not
///    compared.
/// 5. A listener that writes to the store triggers a fully synchronous
///    nested write/notify cycle.
pub struct ReactiveStore<T: Record> {
    inner: Rc<RefCell<StoreInner<T>>>,
}

// Manual Clone: shares the same Rc.
impl<T: Record> Clone for ReactiveStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Record + std::fmt::Debug> std::fmt::Debug for ReactiveStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ReactiveStore")
            .field("state", &inner.state)
            .field("version", &inner.version)
            .field("watched", &inner.watched)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Record> ReactiveStore<T> {
    /// Create a store around `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownWatchedField`] when the watch set
    /// names a field that is not in [`Record::FIELDS`].
    pub fn new(initial: T, config: StoreConfig<T>) -> Result<Self, StoreError> {
        for field in &config.watched {
            if !T::FIELDS.contains(field) {
                return Err(StoreError::UnknownWatchedField {
                    field: format!("{field:?}"),
                });
            }
        }
        Ok(Self {
            inner: Rc::new(RefCell::new(StoreInner {
                state: initial,
                version: 0,
                watched: config.watched.into_iter().collect(),
                transform: config.transform,
                subscribers: Vec::new(),
            })),
        })
    }

    /// Read the current value of `field`. No side effects.
    #[must_use]
    pub fn get(&self, field: T::Field) -> T::Value {
        self.inner.borrow().state.get(field)
    }

    /// Access the whole record by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().state)
    }

    /// Write `value` to `field`.
    ///
    /// The transform (if any) runs first; the result is committed; when
    /// `field` is watched, every current subscriber is invoked
    /// synchronously, in subscription order, before this method returns.
    ///
    /// Listeners may write back into the store; the nested write/notify
    /// cycle runs inline.
    pub fn set(&self, field: T::Field, value: T::Value) {
        let watched = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let committed = match inner.transform.as_deref() {
                Some(transform) => transform(field, value),
                None => value,
            };
            inner.state.set(field, committed);
            inner.version += 1;
            inner.watched.contains(&field)
        };
        if watched {
            self.notify(field);
        }
    }

    /// Subscribe to watched-field writes. The callback takes no arguments.
    ///
    /// Each call creates an independent registration, even for an
    /// identical callback. Dropping the returned [`Subscription`]
    /// unsubscribes exactly that registration.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        let strong: ListenerRc = Rc::new(listener);
        self.inner.borrow_mut().subscribers.push(Rc::downgrade(&strong));
        Subscription { _guard: strong }
    }

    /// Number of committed writes since construction (watched or not).
    /// Useful for dirty-checking in render loops.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Whether writes to `field` notify subscribers.
    #[must_use]
    pub fn is_watched(&self, field: T::Field) -> bool {
        self.inner.borrow().watched.contains(&field)
    }

    /// Number of registered subscribers (including dead ones not yet
    /// pruned).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Notify live subscribers in registration order and prune dead ones.
    ///
    /// Each listener runs isolated: a panicking listener does not prevent
    /// later listeners from running, and the first panic payload is
    /// re-raised to the writer once the pass completes.
    fn notify(&self, field: T::Field) {
        // Collect live callbacks first so no borrow is held while
        // arbitrary listener code (including re-entrant writes) runs.
        let callbacks: Vec<ListenerRc> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner
                .subscribers
                .iter()
                .filter_map(|w| w.upgrade())
                .collect()
        };

        if callbacks.is_empty() {
            return;
        }

        let subscribers_notified = callbacks.len() as u64;
        let start = Instant::now();
        let _span = info_span!(
            "store.notify",
            field = ?field,
            subscribers_notified,
            duration_us = tracing::field::Empty
        )
        .entered();

        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
        for callback in &callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback()));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::Span::current().record("duration_us", duration_us);
        debug!(
            target: "weft.store",
            field = ?field,
            subscribers_notified,
            duration_us,
            "store notification pass"
        );

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }
}

/// RAII guard for a subscriber registration.
///
/// Dropping the `Subscription` removes exactly that registration: the
/// strong `Rc` is dropped, so the `Weak` in the store's subscriber list
/// fails to upgrade on the next notification pass. Other registrations —
/// including ones made with an identical callback — are unaffected.
pub struct Subscription {
    _guard: ListenerRc,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Two-field record: `count` watched in most tests, `label` not.
    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i64,
        label: i64,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum CounterField {
        Count,
        Label,
    }

    impl Record for Counter {
        type Field = CounterField;
        type Value = i64;

        const FIELDS: &'static [CounterField] = &[CounterField::Count, CounterField::Label];

        fn get(&self, field: CounterField) -> i64 {
            match field {
                CounterField::Count => self.count,
                CounterField::Label => self.label,
            }
        }

        fn set(&mut self, field: CounterField, value: i64) {
            match field {
                CounterField::Count => self.count = value,
                CounterField::Label => self.label = value,
            }
        }
    }

    /// Record whose FIELDS deliberately omits a variant, for the
    /// construction-time validation test.
    #[derive(Debug)]
    struct Partial {
        present: i64,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum PartialField {
        Present,
        Phantom,
    }

    impl Record for Partial {
        type Field = PartialField;
        type Value = i64;

        const FIELDS: &'static [PartialField] = &[PartialField::Present];

        fn get(&self, _field: PartialField) -> i64 {
            self.present
        }

        fn set(&mut self, field: PartialField, value: i64) {
            if field == PartialField::Present {
                self.present = value;
            }
        }
    }

    fn counter_store() -> ReactiveStore<Counter> {
        ReactiveStore::new(
            Counter { count: 0, label: 0 },
            StoreConfig::new().watch(CounterField::Count),
        )
        .expect("valid config")
    }

    #[test]
    fn get_set_basic() {
        let store = counter_store();
        assert_eq!(store.get(CounterField::Count), 0);

        store.set(CounterField::Count, 5);
        assert_eq!(store.get(CounterField::Count), 5);
    }

    #[test]
    fn unknown_watched_field_rejected() {
        let err = ReactiveStore::new(
            Partial { present: 0 },
            StoreConfig::new().watch(PartialField::Phantom),
        )
        .unwrap_err();
        assert_eq!(
            err,
            StoreError::UnknownWatchedField {
                field: "Phantom".to_string()
            }
        );
    }

    #[test]
    fn watched_write_notifies_each_subscriber_once() {
        let store = counter_store();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let _sub = store.subscribe(move || {
            count_clone.set(count_clone.get() + 1);
        });

        store.set(CounterField::Count, 1);
        assert_eq!(count.get(), 1);

        store.set(CounterField::Count, 2);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn unwatched_write_is_applied_but_silent() {
        let store = counter_store();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let _sub = store.subscribe(move || {
            count_clone.set(count_clone.get() + 1);
        });

        store.set(CounterField::Label, 9);
        assert_eq!(count.get(), 0);
        assert_eq!(store.get(CounterField::Label), 9);
    }

    #[test]
    fn equal_value_write_still_notifies() {
        let store = counter_store();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let _sub = store.subscribe(move || {
            count_clone.set(count_clone.get() + 1);
        });

        store.set(CounterField::Count, 1);
        store.set(CounterField::Count, 1);
        assert_eq!(count.get(), 2, "no value comparison before notify");
    }

    #[test]
    fn notification_is_synchronous_with_committed_value_visible() {
        let store = counter_store();
        let seen = Rc::new(Cell::new(-1i64));
        let seen_clone = Rc::clone(&seen);
        let reader = store.clone();

        let _sub = store.subscribe(move || {
            seen_clone.set(reader.get(CounterField::Count));
        });

        store.set(CounterField::Count, 7);
        // Listener already ran, and saw the committed value.
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn transform_applies_before_commit() {
        let store = ReactiveStore::new(
            Counter { count: 0, label: 0 },
            StoreConfig::new()
                .watch(CounterField::Count)
                .transform(|_field, value| value * 2),
        )
        .expect("valid config");

        store.set(CounterField::Count, 3);
        assert_eq!(store.get(CounterField::Count), 6);
    }

    #[test]
    fn transform_applies_to_unwatched_fields_too() {
        let store = ReactiveStore::new(
            Counter { count: 0, label: 0 },
            StoreConfig::new()
                .watch(CounterField::Count)
                .transform(|_field, value| value + 10),
        )
        .expect("valid config");

        store.set(CounterField::Label, 1);
        assert_eq!(store.get(CounterField::Label), 11);
    }

    #[test]
    fn transform_receives_field_identifier() {
        let store = ReactiveStore::new(
            Counter { count: 0, label: 0 },
            StoreConfig::new().transform(|field, value| match field {
                CounterField::Count => value * 2,
                CounterField::Label => value,
            }),
        )
        .expect("valid config");

        store.set(CounterField::Count, 3);
        store.set(CounterField::Label, 3);
        assert_eq!(store.get(CounterField::Count), 6);
        assert_eq!(store.get(CounterField::Label), 3);
    }

    #[test]
    fn subscription_drop_unsubscribes() {
        let store = counter_store();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let sub = store.subscribe(move || {
            count_clone.set(count_clone.get() + 1);
        });

        store.set(CounterField::Count, 1);
        assert_eq!(count.get(), 1);

        drop(sub);

        store.set(CounterField::Count, 2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn duplicate_registrations_are_independent() {
        let store = counter_store();
        let count = Rc::new(Cell::new(0u32));

        // Same callback body registered twice; dropping one guard must
        // leave exactly one live registration.
        let count_a = Rc::clone(&count);
        let sub_a = store.subscribe(move || count_a.set(count_a.get() + 1));
        let count_b = Rc::clone(&count);
        let _sub_b = store.subscribe(move || count_b.set(count_b.get() + 1));

        store.set(CounterField::Count, 1);
        assert_eq!(count.get(), 2);

        drop(sub_a);

        store.set(CounterField::Count, 2);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn notification_order_is_registration_order() {
        let store = counter_store();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log1 = Rc::clone(&log);
        let _s1 = store.subscribe(move || log1.borrow_mut().push('A'));

        let log2 = Rc::clone(&log);
        let _s2 = store.subscribe(move || log2.borrow_mut().push('B'));

        let log3 = Rc::clone(&log);
        let _s3 = store.subscribe(move || log3.borrow_mut().push('C'));

        store.set(CounterField::Count, 1);
        assert_eq!(*log.borrow(), vec!['A', 'B', 'C']);
    }

    #[test]
    fn reentrant_write_from_listener_runs_inline() {
        let store = counter_store();
        let writer = store.clone();
        let hits = Rc::new(Cell::new(0u32));
        let hits_clone = Rc::clone(&hits);

        let _sub = store.subscribe(move || {
            hits_clone.set(hits_clone.get() + 1);
            // One nested write, then stop.
            if writer.get(CounterField::Count) == 1 {
                writer.set(CounterField::Count, 2);
            }
        });

        store.set(CounterField::Count, 1);
        assert_eq!(hits.get(), 2, "nested write notifies synchronously");
        assert_eq!(store.get(CounterField::Count), 2);
    }

    #[test]
    fn panicking_listener_does_not_starve_siblings() {
        let store = counter_store();
        let late = Rc::new(Cell::new(false));
        let late_clone = Rc::clone(&late);

        let _bad = store.subscribe(|| panic!("listener failure"));
        let _good = store.subscribe(move || late_clone.set(true));

        let result = catch_unwind(AssertUnwindSafe(|| {
            store.set(CounterField::Count, 1);
        }));
        assert!(result.is_err(), "panic reaches the writer");
        assert!(late.get(), "later listener still ran");
        assert_eq!(store.get(CounterField::Count), 1, "write was committed");
    }

    #[test]
    fn version_counts_every_committed_write() {
        let store = counter_store();
        assert_eq!(store.version(), 0);

        store.set(CounterField::Count, 1);
        store.set(CounterField::Label, 1);
        store.set(CounterField::Count, 1);
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn with_access() {
        let store = counter_store();
        store.set(CounterField::Count, 4);
        store.set(CounterField::Label, 2);
        let sum = store.with(|state| state.count + state.label);
        assert_eq!(sum, 6);
    }

    #[test]
    fn clone_shares_state_and_subscribers() {
        let store = counter_store();
        let other = store.clone();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);

        let _sub = store.subscribe(move || count_clone.set(count_clone.get() + 1));

        other.set(CounterField::Count, 42);
        assert_eq!(store.get(CounterField::Count), 42);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn subscriber_count_prunes_lazily() {
        let store = counter_store();
        assert_eq!(store.subscriber_count(), 0);

        let _s1 = store.subscribe(|| {});
        let s2 = store.subscribe(|| {});
        assert_eq!(store.subscriber_count(), 2);

        drop(s2);
        // Dead subscriber not yet pruned.
        assert_eq!(store.subscriber_count(), 2);

        store.set(CounterField::Count, 1);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn is_watched_reflects_config() {
        let store = counter_store();
        assert!(store.is_watched(CounterField::Count));
        assert!(!store.is_watched(CounterField::Label));
    }

    #[test]
    fn debug_format() {
        let store = counter_store();
        let dbg = format!("{store:?}");
        assert!(dbg.contains("ReactiveStore"));
        assert!(dbg.contains("version"));
    }

    // -----------------------------------------------------------------
    // Tracing span capture
    // -----------------------------------------------------------------

    struct NotifySpanSubscriber {
        next_id: AtomicU64,
        spans: std::sync::Arc<Mutex<Vec<u64>>>,
    }

    struct NotifyVisitor {
        subscribers_notified: Option<u64>,
    }

    impl tracing::field::Visit for NotifyVisitor {
        fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
            if field.name() == "subscribers_notified" {
                self.subscribers_notified = Some(value);
            }
        }

        fn record_debug(&mut self, _field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {}
    }

    impl tracing::Subscriber for NotifySpanSubscriber {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            if attrs.metadata().name() == "store.notify" {
                let mut visitor = NotifyVisitor {
                    subscribers_notified: None,
                };
                attrs.record(&mut visitor);
                self.spans
                    .lock()
                    .expect("span capture lock")
                    .push(visitor.subscribers_notified.unwrap_or(0));
            }
            tracing::span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}
        fn event(&self, _event: &tracing::Event<'_>) {}
        fn enter(&self, _span: &tracing::span::Id) {}
        fn exit(&self, _span: &tracing::span::Id) {}
    }

    fn capture_notify_spans(run: impl FnOnce()) -> Vec<u64> {
        let spans = std::sync::Arc::new(Mutex::new(Vec::new()));
        let subscriber = NotifySpanSubscriber {
            next_id: AtomicU64::new(1),
            spans: std::sync::Arc::clone(&spans),
        };
        let _guard = tracing::subscriber::set_default(subscriber);
        run();
        let captured = spans.lock().expect("span capture lock").clone();
        captured
    }

    #[test]
    fn unwatched_write_emits_no_notify_span() {
        let store = counter_store();
        let _sub = store.subscribe(|| {});
        let spans = capture_notify_spans(|| {
            store.set(CounterField::Label, 1);
        });
        assert!(spans.is_empty());
    }

    #[test]
    fn notify_span_reports_subscriber_count() {
        let store = counter_store();
        let _sub_a = store.subscribe(|| {});
        let _sub_b = store.subscribe(|| {});
        let spans = capture_notify_spans(|| {
            store.set(CounterField::Count, 1);
        });
        assert_eq!(spans, vec![2]);
    }
}
