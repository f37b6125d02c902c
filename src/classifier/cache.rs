//! Bounded FIFO memo cache for classification results

use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub(crate) struct MemoCache<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V: Clone> MemoCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Drop the oldest half of the entries
    pub fn compact(&mut self) -> usize {
        let drop_count = self.order.len() / 2 + self.order.len() % 2;
        for _ in 0..drop_count {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        drop_count
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut cache = MemoCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("c".into(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_compact_halves() {
        let mut cache = MemoCache::new(10);
        for i in 0..5 {
            cache.insert(format!("k{i}"), i);
        }
        assert_eq!(cache.compact(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("k4"), Some(4));
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let mut cache = MemoCache::new(0);
        cache.insert("a".into(), 1);
        assert_eq!(cache.len(), 0);
    }
}
