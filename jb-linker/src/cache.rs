//! Bounded symbol → descriptor cache shared by every library.

use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug)]
pub struct SignatureCache {
    entries: Mutex<VecDeque<(String, String)>>,
    capacity: usize,
}

impl SignatureCache {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, symbol: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, descriptor)| descriptor.clone())
    }

    /// Stores `symbol → descriptor`, evicting the oldest entry when full. A symbol that
    /// is already present keeps its position and gets the new descriptor.
    pub fn insert(&self, symbol: &str, descriptor: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|(name, _)| name == symbol) {
            entry.1 = descriptor.to_string();
            return;
        }
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((symbol.to_string(), descriptor.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(String, String)>> {
        // Entries are replaced whole, so a poisoned guard still holds consistent data.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(32)
    }
}
