//! Client attachment table: slot index ↔ (connection, stream id).
//!
//! Stream ids travel over the wire, so slot indices must stay small and
//! dense: allocation always picks the lowest invalid slot and detach resets
//! a slot in place instead of removing it. Handles handed out to callers are
//! generation-stamped; a slot that has been reused since the handle was
//! issued fails lookup instead of silently aliasing the new occupant.

use std::sync::{Arc, Weak};

use crate::transport::ClientConn;

/// Stable handle to one attachment, valid until the slot is detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    index: usize,
    generation: u64,
}

impl ClientId {
    pub fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// One attachment slot. Holds a non-owning reference to the client
/// connection; the connection task owns the `Arc`, so a dropped connection
/// invalidates the slot without any bookkeeping here.
#[derive(Debug, Default)]
pub struct ClientSlot {
    conn: Option<Weak<ClientConn>>,
    stream_id: u16,
    generation: u64,
}

impl ClientSlot {
    /// A slot is valid while its connection reference is present and the
    /// connection is still alive.
    pub fn is_valid(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|conn| conn.strong_count() > 0)
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Upgrades the connection reference, if the connection is still alive.
    pub fn conn(&self) -> Option<Arc<ClientConn>> {
        self.conn.as_ref()?.upgrade()
    }

    // A vacated slot leaves the handle's generation behind, so the handle
    // that detached it is just as stale as any other.
    fn vacate(&mut self) {
        self.conn = None;
        self.stream_id = 0;
        self.generation += 1;
    }
}

/// Dense, index-stable attachment table.
#[derive(Debug, Default)]
pub struct ClientTable {
    slots: Vec<ClientSlot>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the lowest invalid slot, growing the table by one only when
    /// every existing slot is occupied.
    pub fn free_slot(&mut self) -> usize {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.is_valid() {
                return index;
            }
        }
        self.slots.push(ClientSlot::default());
        self.slots.len() - 1
    }

    /// Occupies the lowest free slot with the given connection and stream
    /// id. The slot generation is bumped on every occupation, so handles
    /// issued for a previous occupant cannot alias the new one.
    pub fn attach(&mut self, conn: &Arc<ClientConn>, stream_id: u16) -> ClientId {
        let index = self.free_slot();
        let slot = &mut self.slots[index];
        slot.generation += 1;
        slot.conn = Some(Arc::downgrade(conn));
        slot.stream_id = stream_id;
        ClientId::new(index, slot.generation)
    }

    /// Bounds-checked lookup by raw index. Never grows the table.
    pub fn get(&self, index: usize) -> Option<&ClientSlot> {
        self.slots.get(index)
    }

    /// Handle lookup: the slot must still be on the handle's generation and
    /// hold a live connection.
    pub fn lookup(&self, id: ClientId) -> Option<&ClientSlot> {
        let slot = self.slots.get(id.index())?;
        if slot.generation == id.generation() && slot.is_valid() {
            Some(slot)
        } else {
            None
        }
    }

    /// Resets the handle's slot to the invalid state, keeping the index
    /// allocatable. Returns false for a stale or out-of-range handle.
    pub fn detach(&mut self, id: ClientId) -> bool {
        match self.slots.get_mut(id.index()) {
            Some(slot) if slot.generation == id.generation() => {
                slot.vacate();
                true
            }
            _ => false,
        }
    }

    /// Number of currently valid slots (not the table length).
    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_valid()).count()
    }

    /// Total table length including invalid slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every slot; only used when the owning session is recycled.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: u64) -> Arc<ClientConn> {
        Arc::new(ClientConn::new(id, format!("test-{}", id)))
    }

    #[test]
    fn test_attach_fills_lowest_slot_first() {
        let mut table = ClientTable::new();
        let c0 = conn(0);
        let c1 = conn(1);
        let a = table.attach(&c0, 100);
        let b = table.attach(&c1, 101);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn test_detach_makes_slot_reusable() {
        let mut table = ClientTable::new();
        let c0 = conn(0);
        let c1 = conn(1);
        let c2 = conn(2);
        let a = table.attach(&c0, 100);
        let _b = table.attach(&c1, 101);

        assert!(table.detach(a));
        let c = table.attach(&c2, 102);
        assert_eq!(c.index(), 0, "freed slot must be reused before growing");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_stale_handle_fails_lookup_after_reuse() {
        let mut table = ClientTable::new();
        let c0 = conn(0);
        let c1 = conn(1);
        let a = table.attach(&c0, 100);
        table.detach(a);
        let b = table.attach(&c1, 101);
        assert_eq!(a.index(), b.index());

        assert!(table.lookup(a).is_none(), "stale handle must not resolve");
        assert!(table.lookup(b).is_some());
        assert!(!table.detach(a), "stale handle must not detach new occupant");
    }

    #[test]
    fn test_valid_count_tracks_live_connections() {
        let mut table = ClientTable::new();
        let c0 = conn(0);
        let a = table.attach(&c0, 100);
        {
            let c1 = conn(1);
            table.attach(&c1, 101);
            assert_eq!(table.valid_count(), 2);
        }
        // c1 dropped: its slot is invalid without an explicit detach.
        assert_eq!(table.valid_count(), 1);
        assert!(table.lookup(a).is_some());
    }

    #[test]
    fn test_get_is_bounds_checked_and_does_not_grow() {
        let table = ClientTable::new();
        assert!(table.get(5).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_dead_connection_slot_is_reallocated_safely() {
        let mut table = ClientTable::new();
        let a = {
            let c0 = conn(0);
            table.attach(&c0, 100)
        };
        // Connection dropped without detach; slot 0 is invalid but keeps
        // its generation until the next occupation.
        let c1 = conn(1);
        let b = table.attach(&c1, 101);
        assert_eq!(b.index(), 0);
        assert!(table.lookup(a).is_none());
        assert!(table.lookup(b).is_some());
    }
}
