//! Ordered-map primitive standing in for the red-black tree of spec §4.A.
//!
//! `BTreeMap` is a B-tree rather than a red-black tree, but it gives the
//! same asymptotic ordered-map contract the kernel actually needs (ordered
//! iteration, O(log n) lookup/insert/remove) and is exactly what the other
//! no-std kernels in the example pack reach for in this spot
//! (`examples/other_examples/456e0559_hermit-os-kernel__src-scheduler-mod.rs.rs`
//! uses `alloc::collections::BTreeMap` for its per-task/per-id maps). See
//! DESIGN.md for the open-question note on this substitution.

use alloc::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct OrderedMap<K: Ord, V> {
    inner: BTreeMap<K, V>,
}

impl<K: Ord + Clone, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        OrderedMap {
            inner: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Smallest-keyed entry not less than `from` — used by the routing
    /// table's prefix-length slots and other "find the nearest" lookups.
    pub fn range_from(&self, from: K) -> impl Iterator<Item = (&K, &V)> {
        self.inner.range(from..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut m: OrderedMap<u32, &str> = OrderedMap::new();
        m.insert(5, "five");
        m.insert(1, "one");
        assert_eq!(m.get(&5), Some(&"five"));
        assert_eq!(m.remove(&5), Some("five"));
        assert_eq!(m.get(&5), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn iter_is_key_ordered() {
        let mut m: OrderedMap<u32, u32> = OrderedMap::new();
        m.insert(3, 30);
        m.insert(1, 10);
        m.insert(2, 20);
        let keys: alloc::vec::Vec<u32> = m.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, alloc::vec![1, 2, 3]);
    }
}
