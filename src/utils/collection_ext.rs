//! Collection helpers shared across stages.

use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;

/// Group a Vec by key, preserving per-group insertion order.
#[inline]
pub fn group_by<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut map: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        map.entry(key_fn(&item)).or_default().push(item);
    }
    map
}

/// Dedupe while preserving first-seen order.
#[inline]
pub fn unique_ordered<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ordered_keeps_first_occurrence() {
        assert_eq!(unique_ordered(vec![1, 2, 1, 3, 2]), vec![1, 2, 3]);
    }

    #[test]
    fn group_by_partitions() {
        let grouped = group_by(vec![1, 2, 3, 4], |n| n % 2);
        assert_eq!(grouped[&0], vec![2, 4]);
        assert_eq!(grouped[&1], vec![1, 3]);
    }
}
