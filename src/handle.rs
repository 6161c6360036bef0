//! Generation-tagged session handles.
//!
//! Sessions live in an arena of slots. A handle names a slot and the
//! generation it was issued for; destroying a session bumps the slot
//! generation, so every outstanding handle to it stops resolving.

use std::fmt;
use std::sync::Arc;

/// Opaque, copyable reference to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: u32,
    generation: u32,
}

impl SessionHandle {
    /// The handle that never resolves.
    pub const NULL: Self = Self {
        index: 0,
        generation: 0,
    };

    /// Whether this is the null handle.
    pub const fn is_null(self) -> bool {
        self.generation == 0
    }

    /// Pack into a `u64` for foreign boundaries. The null handle is `0`.
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpack a value produced by [`SessionHandle::to_raw`].
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// Slot arena issuing [`SessionHandle`]s.
pub struct SessionArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for SessionArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> SessionArena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and return its handle.
    pub fn insert(&mut self, value: Arc<T>) -> SessionHandle {
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index as usize) {
                slot.value = Some(value);
                return SessionHandle {
                    index,
                    generation: slot.generation,
                };
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        SessionHandle {
            index,
            generation: 1,
        }
    }

    fn slot(&self, handle: SessionHandle) -> Option<&Slot<T>> {
        if handle.is_null() {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Resolve a live handle.
    pub fn get(&self, handle: SessionHandle) -> Option<Arc<T>> {
        self.slot(handle).and_then(|slot| slot.value.as_ref().map(Arc::clone))
    }

    /// Remove the value behind `handle`, invalidating it and every copy.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<Arc<T>> {
        if handle.is_null() {
            return None;
        }
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;

        // Generation 0 is reserved for the null handle.
        slot.generation = slot.generation.checked_add(1).unwrap_or(1);
        self.free.push(handle.index);
        Some(value)
    }

    /// Every live value.
    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    /// Remove every value.
    pub fn drain(&mut self) -> Vec<Arc<T>> {
        let mut drained = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.checked_add(1).unwrap_or(1);
                #[allow(clippy::cast_possible_truncation)]
                self.free.push(index as u32);
                drained.push(value);
            }
        }
        drained
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.values().count()
    }

    /// Whether no value is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_never_resolves() {
        let mut arena = SessionArena::new();
        arena.insert(Arc::new(1));
        assert!(arena.get(SessionHandle::NULL).is_none());
        assert_eq!(SessionHandle::NULL.to_raw(), 0);
        assert!(SessionHandle::from_raw(0).is_null());
    }

    #[test]
    fn test_removed_handle_is_stale() {
        let mut arena = SessionArena::new();
        let handle = arena.insert(Arc::new("a"));
        assert!(arena.remove(handle).is_some());
        assert!(arena.get(handle).is_none());
        assert!(arena.remove(handle).is_none());
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut arena = SessionArena::new();
        let first = arena.insert(Arc::new("a"));
        arena.remove(first);
        let second = arena.insert(Arc::new("b"));

        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).as_deref(), Some(&"b"));
    }

    #[test]
    fn test_raw_round_trip() {
        let mut arena = SessionArena::new();
        arena.insert(Arc::new(0));
        let handle = arena.insert(Arc::new(1));
        let raw = handle.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(SessionHandle::from_raw(raw), handle);
    }

    #[test]
    fn test_drain_invalidates_all() {
        let mut arena = SessionArena::new();
        let a = arena.insert(Arc::new(1));
        let b = arena.insert(Arc::new(2));
        assert_eq!(arena.drain().len(), 2);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_none());
        assert!(arena.is_empty());
    }
}
