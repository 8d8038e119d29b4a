//! Index-keyed sequences and the store/sink interfaces the processor runs
//! against.
//!
//! A [`Sequence`] keeps its entries ordered: numeric sequences sort by
//! numeric index value and match lookups within a tolerance, text sequences
//! keep insertion order and match exactly. Index values are unique within a
//! sequence, putting an existing value replaces its item.

use crate::{enums::IndexType, error::ProcessorError, frame::Frame};

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexValue(String);

impl IndexValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numeric(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<f64> for IndexValue {
    fn from(value: f64) -> Self {
        Self(value.to_string())
    }
}

impl From<usize> for IndexValue {
    fn from(value: usize) -> Self {
        Self(value.to_string())
    }
}

/// Read access to an ordered, index-keyed collection.
pub trait FrameStore<T = Frame> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn frame_at(&self, ordinal: usize) -> Option<&T>;

    fn index_value_at(&self, ordinal: usize) -> Option<&IndexValue>;

    fn frame_for_index(&self, index_value: &IndexValue) -> Option<&T>;

    fn index_metadata(&self) -> Option<&IndexMetadata> {
        None
    }
}

/// Destination of per-frame results.
pub trait ResultSink<T> {
    fn clear(&mut self);

    fn put(&mut self, item: T, index_value: IndexValue);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called once before the first frame with the driving sequence's
    /// index metadata.
    fn prepare(&mut self, _index: &IndexMetadata) {}
}

/// Name, unit and matching rules shared by the index values of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub unit: String,
    pub index_type: IndexType,
    pub numeric_tolerance: f64,
}

impl Default for IndexMetadata {
    fn default() -> Self {
        Self {
            name: "time".to_string(),
            unit: "s".to_string(),
            index_type: IndexType::Numeric,
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry<T> {
    index_value: IndexValue,
    item: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sequence<T = Frame> {
    index: IndexMetadata,
    entries: Vec<Entry<T>>,
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Sequence<T> {
    pub fn new() -> Self {
        Self::with_index(IndexMetadata::default())
    }

    pub fn with_index(index: IndexMetadata) -> Self {
        Self {
            index,
            entries: Vec::new(),
        }
    }

    /// Builds a sequence from `(index value, item)` pairs, later duplicates
    /// replacing earlier ones.
    pub fn from_entries(
        index: IndexMetadata,
        entries: impl IntoIterator<Item = (IndexValue, T)>,
    ) -> Self {
        let mut sequence = Self::with_index(index);
        for (index_value, item) in entries {
            sequence.put(item, index_value);
        }
        sequence
    }

    pub fn index(&self) -> &IndexMetadata {
        &self.index
    }

    pub fn set_index(&mut self, index: IndexMetadata) {
        self.index = index;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn item_at(&self, ordinal: usize) -> Option<&T> {
        self.entries.get(ordinal).map(|e| &e.item)
    }

    pub fn item_at_mut(&mut self, ordinal: usize) -> Option<&mut T> {
        self.entries.get_mut(ordinal).map(|e| &mut e.item)
    }

    pub fn index_value_at(&self, ordinal: usize) -> Option<&IndexValue> {
        self.entries.get(ordinal).map(|e| &e.index_value)
    }

    pub fn item_for_index(&self, index_value: &IndexValue) -> Option<&T> {
        self.position(index_value).map(|p| &self.entries[p].item)
    }

    /// Ordinal of the entry matching `index_value`.
    pub fn position(&self, index_value: &IndexValue) -> Option<usize> {
        if self.index.index_type == IndexType::Numeric {
            if let Some(target) = index_value.numeric() {
                let tolerance = self.index.numeric_tolerance;
                // Entries are sorted, so the first entry not below the lower
                // tolerance bound is the only candidate.
                let candidate = self.entries.partition_point(|e| {
                    e.index_value
                        .numeric()
                        .is_some_and(|v| v < target - tolerance)
                });
                let hit = self.entries.get(candidate).is_some_and(|e| {
                    e.index_value
                        .numeric()
                        .is_some_and(|v| (v - target).abs() <= tolerance)
                });
                if hit {
                    return Some(candidate);
                }
            }
        }
        self.entries
            .iter()
            .position(|e| e.index_value == *index_value)
    }

    /// Stores `item` at `index_value`, replacing the item already there.
    pub fn put(&mut self, item: T, index_value: IndexValue) {
        if let Some(existing) = self.position(&index_value) {
            self.entries[existing].item = item;
            return;
        }
        let position = self.insert_position(&index_value);
        self.entries.insert(position, Entry { index_value, item });
    }

    fn insert_position(&self, index_value: &IndexValue) -> usize {
        match (self.index.index_type, index_value.numeric()) {
            (IndexType::Numeric, Some(target)) => self
                .entries
                .partition_point(|e| e.index_value.numeric().is_some_and(|v| v < target)),
            _ => self.entries.len(),
        }
    }

    pub fn remove(&mut self, index_value: &IndexValue) -> Option<T> {
        let position = self.position(index_value)?;
        Some(self.entries.remove(position).item)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn index_values(&self) -> impl Iterator<Item = &IndexValue> {
        self.entries.iter().map(|e| &e.index_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexValue, &T)> {
        self.entries.iter().map(|e| (&e.index_value, &e.item))
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|e| &mut e.item)
    }

    /// Consumes the sequence, yielding `(index value, item)` in order.
    pub fn into_entries(self) -> impl Iterator<Item = (IndexValue, T)> {
        self.entries.into_iter().map(|e| (e.index_value, e.item))
    }
}

impl<T> FrameStore<T> for Sequence<T> {
    fn len(&self) -> usize {
        Sequence::len(self)
    }

    fn frame_at(&self, ordinal: usize) -> Option<&T> {
        self.item_at(ordinal)
    }

    fn index_value_at(&self, ordinal: usize) -> Option<&IndexValue> {
        Sequence::index_value_at(self, ordinal)
    }

    fn frame_for_index(&self, index_value: &IndexValue) -> Option<&T> {
        self.item_for_index(index_value)
    }

    fn index_metadata(&self) -> Option<&IndexMetadata> {
        Some(&self.index)
    }
}

impl<T> ResultSink<T> for Sequence<T> {
    fn clear(&mut self) {
        Sequence::clear(self);
    }

    fn put(&mut self, item: T, index_value: IndexValue) {
        Sequence::put(self, item, index_value);
    }

    fn len(&self) -> usize {
        Sequence::len(self)
    }

    fn prepare(&mut self, index: &IndexMetadata) {
        self.index = index.clone();
    }
}

/// An input that is either one item used for every index value or a
/// sequence looked up by index value.
#[derive(Debug)]
pub enum SequenceInput<'a, T = Frame> {
    SingleFrame(&'a T),
    Sequence(&'a Sequence<T>),
}

impl<T> Clone for SequenceInput<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SequenceInput<'_, T> {}

impl<'a, T> SequenceInput<'a, T> {
    pub fn resolve(&self, index_value: &IndexValue) -> Option<&'a T> {
        match *self {
            SequenceInput::SingleFrame(item) => Some(item),
            SequenceInput::Sequence(sequence) => sequence.item_for_index(index_value),
        }
    }

    pub fn first(&self) -> Option<&'a T> {
        match *self {
            SequenceInput::SingleFrame(item) => Some(item),
            SequenceInput::Sequence(sequence) => sequence.item_at(0),
        }
    }

    pub fn as_sequence(&self) -> Option<&'a Sequence<T>> {
        match *self {
            SequenceInput::SingleFrame(_) => None,
            SequenceInput::Sequence(sequence) => Some(sequence),
        }
    }
}

/// How a secondary sequence has to line up with the driving sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correspondence {
    /// Same length and every driving index value present.
    Exact,
    /// Every secondary index value present in the driving sequence.
    Subset,
}

pub fn check_correspondence<A, B, D, S>(
    what: &'static str,
    driving: &D,
    secondary: &S,
    correspondence: Correspondence,
) -> Result<(), ProcessorError>
where
    D: FrameStore<A> + ?Sized,
    S: FrameStore<B> + ?Sized,
{
    match correspondence {
        Correspondence::Exact => {
            if driving.len() != secondary.len() {
                return Err(ProcessorError::LengthMismatch {
                    what,
                    expected: driving.len(),
                    found: secondary.len(),
                });
            }
            for ordinal in 0..driving.len() {
                if let Some(index_value) = driving.index_value_at(ordinal) {
                    if secondary.frame_for_index(index_value).is_none() {
                        return Err(ProcessorError::IndexMismatch {
                            what,
                            index_value: index_value.clone(),
                        });
                    }
                }
            }
        }
        Correspondence::Subset => {
            for ordinal in 0..secondary.len() {
                if let Some(index_value) = secondary.index_value_at(ordinal) {
                    if driving.frame_for_index(index_value).is_none() {
                        return Err(ProcessorError::IndexMismatch {
                            what,
                            index_value: index_value.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(values: &[&str]) -> Sequence<u32> {
        Sequence::from_entries(
            IndexMetadata::default(),
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (IndexValue::from(*v), i as u32)),
        )
    }

    #[test]
    fn test_numeric_put_keeps_sorted_order() {
        let sequence = numeric(&["3", "1", "2.5"]);
        let order: Vec<_> = sequence.index_values().map(IndexValue::as_str).collect();
        assert_eq!(order, vec!["1", "2.5", "3"]);
    }

    #[test]
    fn test_text_put_keeps_insertion_order() {
        let index = IndexMetadata {
            index_type: IndexType::Text,
            ..Default::default()
        };
        let sequence = Sequence::from_entries(
            index,
            [("b", 0), ("a", 1), ("c", 2)].map(|(k, v)| (IndexValue::from(k), v)),
        );
        let order: Vec<_> = sequence.index_values().map(IndexValue::as_str).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_numeric_lookup_within_tolerance() {
        let sequence = numeric(&["0", "1", "2"]);
        assert_eq!(sequence.position(&IndexValue::from("1.0005")), Some(1));
        assert_eq!(sequence.position(&IndexValue::from("1.01")), None);
        assert_eq!(sequence.position(&IndexValue::from("-1")), None);
    }

    #[test]
    fn test_put_existing_value_replaces() {
        let mut sequence = numeric(&["0", "1"]);
        sequence.put(42, IndexValue::from("1.0"));
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.item_at(1), Some(&42));
    }

    #[test]
    fn test_remove() {
        let mut sequence = numeric(&["0", "1", "2"]);
        assert_eq!(sequence.remove(&IndexValue::from("1")), Some(1));
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.remove(&IndexValue::from("7")), None);
    }

    #[test]
    fn test_single_frame_input_resolves_everywhere() {
        let item = 7u32;
        let input = SequenceInput::SingleFrame(&item);
        assert_eq!(input.resolve(&IndexValue::from("123")), Some(&7));
        assert!(input.as_sequence().is_none());
    }

    #[test]
    fn test_exact_correspondence_rejects_length_mismatch() {
        let driving = numeric(&["0", "1", "2"]);
        let secondary = numeric(&["0", "1"]);
        let result = check_correspondence("labels", &driving, &secondary, Correspondence::Exact);
        assert!(matches!(
            result,
            Err(ProcessorError::LengthMismatch {
                expected: 3,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_exact_correspondence_rejects_different_values() {
        let driving = numeric(&["0", "1"]);
        let secondary = numeric(&["0", "5"]);
        let result = check_correspondence("labels", &driving, &secondary, Correspondence::Exact);
        assert!(matches!(result, Err(ProcessorError::IndexMismatch { .. })));
    }

    #[test]
    fn test_subset_correspondence() {
        let driving = numeric(&["0", "1", "2"]);
        assert!(
            check_correspondence(
                "transforms",
                &driving,
                &numeric(&["0", "2"]),
                Correspondence::Subset
            )
            .is_ok()
        );
        assert!(
            check_correspondence(
                "transforms",
                &driving,
                &numeric(&["0", "9"]),
                Correspondence::Subset
            )
            .is_err()
        );
    }
}
