use std::collections::btree_map;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::utils::Element;

mod element;

pub use element::MatrixElement;
pub(crate) use element::OrderedRows;

/// Sparse vector keeping only non-zero entries, ordered by index.
///
/// Assigning zero to an index removes it, so two vectors are equal exactly
/// when they hold the same non-zero entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector<T: Element> {
    entries: BTreeMap<usize, T>,
}

impl<T: Element> Default for SparseVector<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Element> SparseVector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored value or zero.
    pub fn get(&self, index: usize) -> T {
        self.entries.get(&index).copied().unwrap_or_else(T::zero)
    }

    /// Stores `value` at `index`; a zero value removes the entry. Returns the
    /// previous non-zero value.
    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        if value.is_zero() {
            self.entries.remove(&index)
        } else {
            self.entries.insert(index, value)
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.entries.remove(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn non_zero_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Largest stored index, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.entries.keys().next_back().copied()
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = T> + '_ {
        self.entries.values().copied()
    }

    /// Dot product with a dense slice; indices past the slice count as zero.
    pub fn dot_dense(&self, dense: &[T]) -> T {
        self.iter()
            .filter(|(index, _)| *index < dense.len())
            .fold(T::zero(), |acc, (index, value)| acc + value * dense[index])
    }
}

impl<T: Element + Eq> Eq for SparseVector<T> {}

impl<T: Element + Hash> Hash for SparseVector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entries.len().hash(state);
        for (index, value) in &self.entries {
            index.hash(state);
            value.hash(state);
        }
    }
}

impl<T: Element> FromIterator<(usize, T)> for SparseVector<T> {
    fn from_iter<I: IntoIterator<Item = (usize, T)>>(iter: I) -> Self {
        let mut vector = Self::new();
        vector.extend(iter);
        vector
    }
}

impl<T: Element> Extend<(usize, T)> for SparseVector<T> {
    fn extend<I: IntoIterator<Item = (usize, T)>>(&mut self, iter: I) {
        for (index, value) in iter {
            self.insert(index, value);
        }
    }
}

impl<T: Element, const N: usize> From<[(usize, T); N]> for SparseVector<T> {
    fn from(entries: [(usize, T); N]) -> Self {
        entries.into_iter().collect()
    }
}

pub struct Iter<'a, T: Element> {
    inner: btree_map::Iter<'a, usize, T>,
}

impl<T: Element> Iterator for Iter<'_, T> {
    type Item = (usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(&index, &value)| (index, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: Element> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(&index, &value)| (index, value))
    }
}

impl<T: Element> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T: Element> IntoIterator for &'a SparseVector<T> {
    type Item = (usize, T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Element> IntoIterator for SparseVector<T> {
    type Item = (usize, T);
    type IntoIter = btree_map::IntoIter<usize, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
