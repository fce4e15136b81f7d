//! Address ranges to values, for symbolization. Based on a BTreeMap keyed by range start.

use std::{
    collections::BTreeMap,
    fmt,
    ops::{Bound, Range, RangeBounds},
};

pub struct Span<V> {
    end: usize,
    value: V,
}

pub struct RangeMap<V> {
    spans: BTreeMap<usize, Span<V>>,
}

impl<V> RangeMap<V> {
    pub fn new() -> Self {
        Self { spans: BTreeMap::new() }
    }

    /// Maps every address of `range` to `value`. A range starting where another one starts
    /// replaces it.
    pub fn insert(&mut self, range: impl RangeBounds<usize>, value: V) {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => usize::MIN,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => usize::MAX,
        };
        if start < end {
            self.spans.insert(start, Span { end, value });
        }
    }

    /// Value of the range `addr` falls in.
    pub fn get(&self, addr: usize) -> Option<&V> {
        let (_, span) = self.spans.range(..=addr).next_back()?;
        (addr < span.end).then_some(&span.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Range<usize>, &V)> {
        self.spans.iter().map(|(&start, span)| (start..span.end, &span.value))
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }
}

impl<V> Default for RangeMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for RangeMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V, R: RangeBounds<usize>> FromIterator<(R, V)> for RangeMap<V> {
    fn from_iter<T: IntoIterator<Item = (R, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        iter.into_iter().for_each(|(range, value)| map.insert(range, value));
        map
    }
}

impl<V> IntoIterator for RangeMap<V> {
    type Item = (Range<usize>, V);
    type IntoIter = std::iter::Map<
        std::collections::btree_map::IntoIter<usize, Span<V>>,
        fn((usize, Span<V>)) -> Self::Item,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.into_iter().map(|(start, span)| (start..span.end, span.value))
    }
}
