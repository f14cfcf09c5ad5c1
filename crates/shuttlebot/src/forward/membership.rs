use std::fmt;

/// Immutable set backed by a sorted vector.
///
/// The values are sorted and deduplicated exactly once, on construction, so
/// every membership query is a plain binary search.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SortedSet<T> {
    items: Vec<T>,
}

impl<T: Ord> SortedSet<T> {
    pub(crate) fn new(mut items: Vec<T>) -> Self {
        items.sort_unstable();
        items.dedup();
        Self { items }
    }

    pub(crate) fn contains(&self, value: &T) -> bool {
        self.items.binary_search(value).is_ok()
    }

    pub(crate) fn lacks(&self, value: &T) -> bool {
        !self.contains(value)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Ord> FromIterator<T> for SortedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T: fmt::Debug> fmt::Debug for SortedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(&self.items).finish()
    }
}
