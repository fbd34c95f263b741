#![forbid(unsafe_code)]

//! Record abstraction: the statically-shaped state a store wraps.
//!
//! A browser-style proxy can intercept arbitrary property assignments; a
//! systems language cannot. [`Record`] makes the interception point
//! explicit: state types enumerate their fields and route all reads and
//! writes through a single `get`/`set` pair keyed by a field identifier.

use std::fmt;
use std::hash::Hash;

/// A fixed-shape record whose fields are addressed by an enumerated
/// identifier.
///
/// `FIELDS` must list every field the record actually carries; the store
/// validates its watched-field configuration against it at construction.
///
/// Records with fields of more than one type use an enum for
/// [`Record::Value`]:
///
/// ```
/// use weft_reactive::Record;
///
/// struct Settings {
///     volume: i64,
///     locale: String,
/// }
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// enum SettingsField {
///     Volume,
///     Locale,
/// }
///
/// #[derive(Clone, Debug, PartialEq)]
/// enum SettingsValue {
///     Int(i64),
///     Text(String),
/// }
///
/// impl Record for Settings {
///     type Field = SettingsField;
///     type Value = SettingsValue;
///
///     const FIELDS: &'static [SettingsField] =
///         &[SettingsField::Volume, SettingsField::Locale];
///
///     fn get(&self, field: SettingsField) -> SettingsValue {
///         match field {
///             SettingsField::Volume => SettingsValue::Int(self.volume),
///             SettingsField::Locale => SettingsValue::Text(self.locale.clone()),
///         }
///     }
///
///     fn set(&mut self, field: SettingsField, value: SettingsValue) {
///         match (field, value) {
///             (SettingsField::Volume, SettingsValue::Int(v)) => self.volume = v,
///             (SettingsField::Locale, SettingsValue::Text(v)) => self.locale = v,
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait Record: 'static {
    /// Enumerated field identifier.
    type Field: Copy + Eq + Hash + fmt::Debug + 'static;

    /// Value domain of the record's fields.
    type Value: Clone + fmt::Debug + 'static;

    /// Every field this record carries.
    const FIELDS: &'static [Self::Field];

    /// Read the current value of `field`.
    fn get(&self, field: Self::Field) -> Self::Value;

    /// Overwrite `field` with `value`.
    fn set(&mut self, field: Self::Field, value: Self::Value);
}
