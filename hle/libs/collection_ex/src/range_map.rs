use alloc::collections::{
    btree_map::Iter,
    BTreeMap,
};
use core::{
    borrow::Borrow,
    ops::{Add, Range, Sub},
};

/// A map of disjoint, non-empty ranges inside a bounding range.
///
/// The gaps between the stored ranges are the free space of the map, so
/// removing an item makes its range available again and merges it with the
/// neighboring gaps.
#[derive(Debug)]
pub struct RangeMap<K, V> {
    inner: BTreeMap<K, (Range<K>, V)>,
    range: Range<K>,
}

impl<K, V> RangeMap<K, V> {
    pub fn new(range: Range<K>) -> Self
    where
        K: Ord,
    {
        RangeMap {
            inner: BTreeMap::new(),
            range,
        }
    }

    #[inline]
    pub fn range(&self) -> &Range<K> {
        &self.range
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Insert a new item at the lowest gap that can hold `size`.
    pub fn allocate_with<F, E>(&mut self, size: K, value: F, no_fit: E) -> Result<K, E>
    where
        K: Ord + Sub<Output = K> + Add<Output = K> + Copy,
        F: FnOnce(Range<K>) -> Result<V, E>,
    {
        let mut range = None;

        let mut start = self.range.start;

        for (r, _) in self.inner.values() {
            if r.start - start >= size {
                range = Some(start..(start + size));
                break;
            }
            start = r.end;
        }
        if range.is_none() && self.range.end - start >= size {
            range = Some(start..(start + size));
        }

        match range {
            Some(range) if range.start < range.end => {
                let start = range.start;
                let value = value(range.clone())?;
                self.inner.insert(start, (range, value));
                Ok(start)
            }
            _ => Err(no_fit),
        }
    }

    fn fits(&self, range: &Range<K>) -> bool
    where
        K: Ord + Copy,
    {
        self.range.start <= range.start
            && range.start < range.end
            && range.end <= self.range.end
            && !self.overlaps(range)
    }

    pub fn try_insert_with<F, E, R>(
        &mut self,
        range: Range<K>,
        value: F,
        exist: impl Into<E>,
    ) -> Result<R, E>
    where
        K: Ord + Copy,
        F: FnOnce() -> Result<(V, R), E>,
    {
        if self.fits(&range) {
            let (value, ret) = value()?;
            self.inner.insert(range.start, (range, value));
            Ok(ret)
        } else {
            Err(exist.into())
        }
    }

    /// Insert an item, handing `value` back if `range` is out of bounds, empty
    /// or overlapping.
    pub fn insert(&mut self, range: Range<K>, value: V) -> Result<(), V>
    where
        K: Ord + Copy,
    {
        if self.fits(&range) {
            self.inner.insert(range.start, (range, value));
            Ok(())
        } else {
            Err(value)
        }
    }

    pub fn get<Q>(&self, start: &Q) -> Option<&V>
    where
        Q: ?Sized + Ord,
        K: Borrow<Q> + Ord,
    {
        self.inner.get(start).map(|(_, value)| value)
    }

    #[inline]
    pub fn remove(&mut self, start: K) -> Option<(Range<K>, V)>
    where
        K: Ord,
    {
        self.inner.remove(&start)
    }

    #[inline]
    pub fn iter(&self) -> Iter<K, (Range<K>, V)> {
        self.inner.iter()
    }

    #[inline]
    pub fn get_contained(&self, key: &K) -> Option<&(Range<K>, V)>
    where
        K: Ord,
    {
        self.inner
            .range(..=key)
            .next_back()
            .map(|(_, value)| value)
            .filter(|(range, _)| key < &range.end)
    }

    /// Iterate over the items intersecting `range`, in ascending order.
    pub fn overlapping(&self, range: Range<K>) -> impl Iterator<Item = &(Range<K>, V)> + '_
    where
        K: Ord + Copy,
    {
        let first = self
            .get_contained(&range.start)
            .map_or(range.start, |(r, _)| r.start);
        let end = if first < range.end { range.end } else { first };
        self.inner
            .range(first..end)
            .map(|(_, value)| value)
            .filter(move |(r, _)| range.start < r.end && r.start < range.end)
    }

    #[inline]
    pub fn overlaps(&self, range: &Range<K>) -> bool
    where
        K: Ord + Copy,
    {
        self.overlapping(range.clone()).next().is_some()
    }

    /// Whether every key in `range` belongs to some item.
    pub fn covers(&self, range: &Range<K>) -> bool
    where
        K: Ord + Copy,
    {
        let mut cursor = range.start;
        for (r, _) in self.overlapping(range.clone()) {
            if r.start > cursor {
                return false;
            }
            cursor = r.end;
            if cursor >= range.end {
                return true;
            }
        }
        cursor >= range.end
    }

    #[inline]
    pub fn last(&self) -> Option<&(Range<K>, V)>
    where
        K: Ord,
    {
        self.inner.last_key_value().map(|(_, value)| value)
    }
}
