//! Pure predicates over a [`Message`], composable ahead of time.
//!
//! A [`Matcher`] is a cheap, clonable handle to a side-effect-free
//! `Fn(&Message) -> bool`. Device profiles build their matcher tables once
//! at startup and share them across rules.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::message::{status, Message};

/// A raw byte of a [`Message`] a matcher can inspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Status,
    Data1,
    Data2,
}

impl Field {
    #[inline]
    pub fn get(self, msg: &Message) -> u8 {
        match self {
            Field::Status => msg.status,
            Field::Data1 => msg.data1,
            Field::Data2 => msg.data2,
        }
    }
}

/// A total predicate over a message.
#[derive(Clone)]
pub struct Matcher(Arc<dyn Fn(&Message) -> bool + Send + Sync>);

impl Matcher {
    /// Wrap an arbitrary predicate. It must not depend on mutable state.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Matches every message.
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    /// Matches nothing.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    #[inline]
    pub fn matches(&self, msg: &Message) -> bool {
        (self.0)(msg)
    }

    pub fn and(self, other: Matcher) -> Self {
        all_of([self, other])
    }

    pub fn or(self, other: Matcher) -> Self {
        any_of([self, other])
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher(..)")
    }
}

/// `field == value`.
pub fn equals(field: Field, value: u8) -> Matcher {
    Matcher::new(move |m| field.get(m) == value)
}

/// `field` is one of `values`.
pub fn in_set(field: Field, values: impl IntoIterator<Item = u8>) -> Matcher {
    let values: Vec<u8> = values.into_iter().collect();
    Matcher::new(move |m| values.contains(&field.get(m)))
}

/// `low <= field <= high`.
pub fn in_range(field: Field, low: u8, high: u8) -> Matcher {
    Matcher::new(move |m| (low..=high).contains(&field.get(m)))
}

/// Status with the channel nibble cleared equals `value`.
pub fn masked_status_equals(value: u8) -> Matcher {
    Matcher::new(move |m| m.masked_status() == value)
}

/// True iff every matcher is true. An empty list is true.
pub fn all_of(matchers: impl IntoIterator<Item = Matcher>) -> Matcher {
    let matchers: Vec<Matcher> = matchers.into_iter().collect();
    Matcher::new(move |m| matchers.iter().all(|x| x.matches(m)))
}

/// True iff at least one matcher is true. An empty list is false.
pub fn any_of(matchers: impl IntoIterator<Item = Matcher>) -> Matcher {
    let matchers: Vec<Matcher> = matchers.into_iter().collect();
    Matcher::new(move |m| matchers.iter().any(|x| x.matches(m)))
}

/// Logical negation.
pub fn not(matcher: Matcher) -> Matcher {
    Matcher::new(move |m| !matcher.matches(m))
}

/// Button/pad pressed.
pub fn is_on() -> Matcher {
    Matcher::new(Message::is_on)
}

/// Button/pad released.
pub fn is_off() -> Matcher {
    not(is_on())
}

/// Any note-on, on any channel.
pub fn is_note_on() -> Matcher {
    masked_status_equals(status::NOTE_ON)
}

/// Declarative byte filter, the usual way device profiles describe a control.
///
/// Every constraint left unset is a wildcard.
///
/// ```
/// use padloop_core::matchers::MidiHas;
/// use padloop_core::Message;
///
/// let record = MidiHas::new().status_range(0xB0, 0xBF).data1(0x75).build();
/// assert!(record.matches(&Message::new(0xB3, 0x75, 0x7F)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MidiHas {
    status: Option<Constraint>,
    data1: Option<Constraint>,
    data2: Option<Constraint>,
}

#[derive(Clone, Debug)]
enum Constraint {
    Eq(u8),
    In(Vec<u8>),
    Range(RangeInclusive<u8>),
}

impl Constraint {
    fn into_matcher(self, field: Field) -> Matcher {
        match self {
            Constraint::Eq(v) => equals(field, v),
            Constraint::In(vs) => in_set(field, vs),
            Constraint::Range(r) => in_range(field, *r.start(), *r.end()),
        }
    }
}

impl MidiHas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, value: u8) -> Self {
        self.status = Some(Constraint::Eq(value));
        self
    }

    pub fn status_in(mut self, values: impl IntoIterator<Item = u8>) -> Self {
        self.status = Some(Constraint::In(values.into_iter().collect()));
        self
    }

    pub fn status_range(mut self, low: u8, high: u8) -> Self {
        self.status = Some(Constraint::Range(low..=high));
        self
    }

    pub fn data1(mut self, value: u8) -> Self {
        self.data1 = Some(Constraint::Eq(value));
        self
    }

    pub fn data1_in(mut self, values: impl IntoIterator<Item = u8>) -> Self {
        self.data1 = Some(Constraint::In(values.into_iter().collect()));
        self
    }

    pub fn data1_range(mut self, low: u8, high: u8) -> Self {
        self.data1 = Some(Constraint::Range(low..=high));
        self
    }

    pub fn data2(mut self, value: u8) -> Self {
        self.data2 = Some(Constraint::Eq(value));
        self
    }

    pub fn data2_in(mut self, values: impl IntoIterator<Item = u8>) -> Self {
        self.data2 = Some(Constraint::In(values.into_iter().collect()));
        self
    }

    pub fn data2_range(mut self, low: u8, high: u8) -> Self {
        self.data2 = Some(Constraint::Range(low..=high));
        self
    }

    pub fn build(self) -> Matcher {
        let parts = [
            self.status.map(|c| c.into_matcher(Field::Status)),
            self.data1.map(|c| c.into_matcher(Field::Data1)),
            self.data2.map(|c| c.into_matcher(Field::Data2)),
        ];
        all_of(parts.into_iter().flatten())
    }
}

impl From<MidiHas> for Matcher {
    fn from(filter: MidiHas) -> Self {
        filter.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(status: u8, data1: u8, data2: u8) -> Message {
        Message::new(status, data1, data2)
    }

    #[test]
    fn test_equals_and_sets() {
        let m = msg(0x99, 0x28, 0x7F);
        assert!(equals(Field::Status, 0x99).matches(&m));
        assert!(!equals(Field::Data2, 0x00).matches(&m));
        assert!(in_set(Field::Status, [0x89, 0x99]).matches(&m));
        assert!(!in_set(Field::Data1, Vec::new()).matches(&m));
    }

    #[test]
    fn test_range_is_inclusive() {
        let r = in_range(Field::Data1, 0x28, 0x33);
        assert!(r.matches(&msg(0x99, 0x28, 0)));
        assert!(r.matches(&msg(0x99, 0x33, 0)));
        assert!(!r.matches(&msg(0x99, 0x27, 0)));
        assert!(!r.matches(&msg(0x99, 0x34, 0)));
    }

    #[test]
    fn test_masked_status() {
        let m = masked_status_equals(0x90);
        assert!(m.matches(&msg(0x99, 1, 1)));
        assert!(m.matches(&msg(0x90, 1, 1)));
        assert!(!m.matches(&msg(0x89, 1, 1)));
    }

    #[test]
    fn test_empty_combinators() {
        let m = msg(0x90, 60, 100);
        assert!(all_of(Vec::new()).matches(&m));
        assert!(!any_of(Vec::new()).matches(&m));
    }

    #[test]
    fn test_combinators() {
        let m = msg(0x99, 0x28, 0x7F);
        let pad = equals(Field::Status, 0x99).and(in_range(Field::Data1, 0x28, 0x33));
        assert!(pad.matches(&m));
        assert!(!not(pad.clone()).matches(&m));
        assert!(Matcher::never().or(pad).matches(&m));
        assert!(!all_of([Matcher::any(), Matcher::never()]).matches(&m));
    }

    #[test]
    fn test_on_off() {
        assert!(is_on().matches(&msg(0xB0, 0x75, 0x7F)));
        assert!(is_off().matches(&msg(0xB0, 0x75, 0x00)));
        assert!(is_note_on().matches(&msg(0x9F, 0, 0)));
    }

    #[test]
    fn test_midi_has() {
        let pad = MidiHas::new()
            .status_in([0x89, 0x99])
            .data1_range(0x24, 0x33)
            .build();
        assert!(pad.matches(&msg(0x89, 0x24, 0)));
        assert!(!pad.matches(&msg(0x90, 0x24, 0)));
        assert!(!pad.matches(&msg(0x99, 0x40, 0)));

        // No constraints matches everything
        assert!(MidiHas::new().build().matches(&msg(0, 0, 0)));
    }
}
