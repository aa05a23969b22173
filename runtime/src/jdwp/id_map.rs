use crate::heap::HeapRef;
use std::collections::HashMap;

/// Bidirectional objectID assignment. Ids are dense u32 indices; a slot
/// freed by `DisposeObjects` is reused by the next `put`.
#[derive(Default)]
pub struct IdMap {
    by_id: Vec<Option<HeapRef>>,
    by_ref: HashMap<HeapRef, u32>,
    free: Vec<u32>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing id when the object is already mapped.
    pub fn put(&mut self, object: HeapRef) -> u32 {
        if let Some(id) = self.by_ref.get(&object) {
            return *id;
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.by_id[id as usize - 1] = Some(object);
                id
            }
            None => {
                self.by_id.push(Some(object));
                self.by_id.len() as u32
            }
        };
        self.by_ref.insert(object, id);
        id
    }

    pub fn get(&self, id: u32) -> Option<HeapRef> {
        if id == 0 {
            return None;
        }
        self.by_id.get(id as usize - 1).copied().flatten()
    }

    pub fn remove_id(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        if let Some(slot) = self.by_id.get_mut(id as usize - 1) {
            if let Some(object) = slot.take() {
                self.by_ref.remove(&object);
                self.free.push(id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_ref.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_per_object() {
        let mut map = IdMap::new();
        let a = map.put(64);
        let b = map.put(128);
        assert_ne!(a, b);
        assert_eq!(map.put(64), a);
        assert_eq!(map.get(a), Some(64));
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut map = IdMap::new();
        let a = map.put(64);
        map.remove_id(a);
        assert_eq!(map.get(a), None);
        let b = map.put(256);
        assert_eq!(b, a);
        assert_eq!(map.get(b), Some(256));
    }

    #[test]
    fn id_zero_is_null() {
        let map = IdMap::new();
        assert_eq!(map.get(0), None);
    }
}
