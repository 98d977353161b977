//! Slab storage with stable ids
//!
//! [`Slab`] is the single-threaded arena used for in-flight signal receive
//! state and pending timers: O(1) insert/lookup/remove, ids never reused.
//!
//! [`SharedSlab`] is the fixed-capacity variant behind the NIF. Structure
//! changes take the metadata write lock, element access only locks the
//! element's own slot, so different base stations can be driven from
//! different BEAM schedulers at the same time.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Growable arena. Ids increase monotonically; freed slots are recycled
/// under a fresh id so stale handles never alias a new entry.
#[derive(Debug)]
pub struct Slab<T> {
    slots: Vec<Option<(u64, T)>>,
    free: Vec<usize>,
    id_to_slot: HashMap<u64, usize>,
    next_id: u64,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            id_to_slot: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let slot_idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some((id, item));
                idx
            }
            None => {
                self.slots.push(Some((id, item)));
                self.slots.len() - 1
            }
        };
        self.id_to_slot.insert(id, slot_idx);
        id
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        let idx = *self.id_to_slot.get(&id)?;
        self.slots[idx].as_ref().map(|(_, item)| item)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        let idx = *self.id_to_slot.get(&id)?;
        self.slots[idx].as_mut().map(|(_, item)| item)
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        let idx = self.id_to_slot.remove(&id)?;
        let (_, item) = self.slots[idx].take()?;
        self.free.push(idx);
        Some(item)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.id_to_slot.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|(id, item)| (*id, item)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut T)> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut().map(|(id, item)| (*id, item)))
    }

    pub fn drain(&mut self) -> Vec<(u64, T)> {
        self.id_to_slot.clear();
        self.free.clear();
        let mut out: Vec<(u64, T)> = self.slots.drain(..).flatten().collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

/// Fixed-capacity slab with a lock per slot
pub struct SharedSlab<T> {
    slots: Vec<Mutex<Option<T>>>,
    meta: RwLock<SharedMeta>,
}

struct SharedMeta {
    free: Vec<usize>,
    next_id: u64,
    id_to_slot: HashMap<u64, usize>,
}

impl<T> SharedSlab<T> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            meta: RwLock::new(SharedMeta {
                free: (0..capacity).rev().collect(),
                next_id: 0,
                id_to_slot: HashMap::new(),
            }),
        }
    }

    /// Returns the new id, or None when full
    pub fn insert(&self, item: T) -> Option<u64> {
        let mut meta = self.meta.write().ok()?;
        let slot_idx = meta.free.pop()?;
        let id = meta.next_id;
        meta.next_id += 1;

        *self.slots[slot_idx].lock().ok()? = Some(item);
        meta.id_to_slot.insert(id, slot_idx);
        Some(id)
    }

    fn slot_idx(&self, id: u64) -> Option<usize> {
        self.meta.read().ok()?.id_to_slot.get(&id).copied()
    }

    /// Run `f` with exclusive access to one entry, locking only its slot
    pub fn with_mut<F, R>(&self, id: u64, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let idx = self.slot_idx(id)?;
        let mut guard = self.slots[idx].lock().ok()?;
        guard.as_mut().map(f)
    }

    pub fn with<F, R>(&self, id: u64, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let idx = self.slot_idx(id)?;
        let guard = self.slots[idx].lock().ok()?;
        guard.as_ref().map(f)
    }

    pub fn remove(&self, id: u64) -> Option<T> {
        let mut meta = self.meta.write().ok()?;
        let idx = meta.id_to_slot.remove(&id)?;
        let item = self.slots[idx].lock().ok()?.take()?;
        meta.free.push(idx);
        Some(item)
    }

    pub fn count(&self) -> usize {
        self.meta.read().map(|m| m.id_to_slot.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_insert_get_remove() {
        let mut slab = Slab::new();
        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.remove(a), None);
        assert!(!slab.contains(a));
        assert!(slab.contains(b));
    }

    #[test]
    fn test_slab_reuses_slot_with_new_id() {
        let mut slab = Slab::new();
        let a = slab.insert(1);
        slab.remove(a);
        let b = slab.insert(2);
        assert_ne!(a, b);
        assert_eq!(slab.get(a), None);
        assert_eq!(slab.get(b), Some(&2));
        assert_eq!(slab.slots.len(), 1);
    }

    #[test]
    fn test_slab_drain_in_id_order() {
        let mut slab = Slab::new();
        let a = slab.insert(10);
        slab.insert(20);
        slab.remove(a);
        slab.insert(30);
        let drained: Vec<i32> = slab.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(drained, vec![20, 30]);
        assert!(slab.is_empty());
    }

    #[test]
    fn test_shared_slab_full_and_reuse() {
        let slab: SharedSlab<i32> = SharedSlab::new(2);
        let id1 = slab.insert(1).unwrap();
        let _id2 = slab.insert(2).unwrap();
        assert!(slab.insert(3).is_none());

        slab.remove(id1);
        let id3 = slab.insert(3).unwrap();
        assert_ne!(id3, id1);
        assert_eq!(slab.count(), 2);
        assert!(slab.with(id1, |v| *v).is_none());
    }

    #[test]
    fn test_shared_slab_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let slab: Arc<SharedSlab<i32>> = Arc::new(SharedSlab::new(16));
        let ids: Vec<u64> = (0..8).map(|i| slab.insert(i).unwrap()).collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let slab = Arc::clone(&slab);
                thread::spawn(move || {
                    for _ in 0..500 {
                        slab.with_mut(id, |v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(slab.with(id, |v| *v), Some(i as i32 + 500));
        }
    }
}
