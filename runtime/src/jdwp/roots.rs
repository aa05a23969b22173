use crate::heap::HeapRef;
use std::collections::HashMap;

/// Debugger-held references pinned against collection, with a disable count
/// per object (`DisableCollection` stacks). Wiped wholesale when the session
/// closes.
#[derive(Default)]
pub struct RootTable {
    pins: HashMap<HeapRef, u32>,
}

impl RootTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&mut self, object: HeapRef) {
        *self.pins.entry(object).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, object: HeapRef) {
        if let Some(count) = self.pins.get_mut(&object) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&object);
            }
        }
    }

    pub fn is_pinned(&self, object: HeapRef) -> bool {
        self.pins.contains_key(&object)
    }

    pub fn iter(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.pins.keys().copied()
    }

    pub fn clear(&mut self) {
        self.pins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_counted() {
        let mut table = RootTable::new();
        table.pin(64);
        table.pin(64);
        table.unpin(64);
        assert!(table.is_pinned(64));
        table.unpin(64);
        assert!(!table.is_pinned(64));
    }
}
