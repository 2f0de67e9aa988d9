//! Fixed-capacity id allocator.
//!
//! Grounded in the original's `table.c`/`table.h`: a bitset tracking which
//! ids are in use, plus storage for each live entry. `allocate` returns the
//! lowest free id in the bounded index space; `free` recycles it. Capacity
//! is a construction-time bound rather than the original's compile-time
//! constant, since Rust generics over array length would force every caller
//! to thread the capacity through as a type parameter for no benefit here.

use crate::error::{Error, Result};

pub struct Slab<T> {
    entries: Vec<Option<T>>,
    capacity: usize,
}

impl<T> Slab<T> {
    pub fn with_capacity(capacity: usize) -> Slab<T> {
        Slab {
            entries: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    /// Allocates the lowest free id and stores `value` there.
    pub fn insert(&mut self, value: T) -> Result<usize> {
        self.insert_with(|_id| value)
    }

    /// Allocates the lowest free id and stores whatever `make` builds from
    /// it, for callers (like endpoint records) whose value needs to know
    /// its own id.
    pub fn insert_with(&mut self, make: impl FnOnce(usize) -> T) -> Result<usize> {
        let id = self.next_free_id().ok_or_else(|| {
            Error::ResourceExhausted(format!("descriptor table full (capacity={})", self.capacity))
        })?;
        self.entries[id] = Some(make(id));
        Ok(id)
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.entries.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.entries.get_mut(id)?.as_mut()
    }

    /// Removes and returns the entry at `id`, freeing the slot for reuse.
    /// Idempotent: removing an already-free slot returns `None`.
    pub fn remove(&mut self, id: usize) -> Option<T> {
        self.entries.get_mut(id).and_then(|slot| slot.take())
    }

    pub fn contains(&self, id: usize) -> bool {
        matches!(self.entries.get(id), Some(Some(_)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|v| (id, v)))
    }

    fn next_free_id(&self) -> Option<usize> {
        (0..self.capacity).find(|&id| self.entries[id].is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_id_and_recycles_on_remove() {
        let mut slab: Slab<&str> = Slab::with_capacity(4);
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_eq!((a, b), (0, 1));

        slab.remove(a);
        let c = slab.insert("c").unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn exhausted_table_returns_resource_exhausted_without_side_effects() {
        let mut slab: Slab<u8> = Slab::with_capacity(2);
        slab.insert(1).unwrap();
        slab.insert(2).unwrap();

        let before = slab.iter().count();
        let err = slab.insert(3).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(slab.iter().count(), before);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut slab: Slab<u8> = Slab::with_capacity(2);
        let id = slab.insert(1).unwrap();
        assert!(slab.remove(id).is_some());
        assert!(slab.remove(id).is_none());
    }
}
