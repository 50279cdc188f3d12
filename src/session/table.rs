//! Arena-backed stream table and id allocation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::stream::StreamShared;
use crate::core::constants::{MAX_STREAM_ID, RESET_ID_MEMORY};
use crate::core::{MuxError, MuxResult};
use crate::transport::StreamId;

/// Which end of the transport a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opens odd stream ids.
    Client,
    /// Opens even stream ids.
    Server,
}

impl Role {
    /// First id this role allocates.
    pub fn first_stream_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `id` has this role's parity.
    pub fn owns(self, id: StreamId) -> bool {
        match self {
            Role::Client => id.is_client_initiated(),
            Role::Server => id.is_server_initiated(),
        }
    }
}

/// Routing decision for an inbound frame's stream id.
#[derive(Debug)]
pub(crate) enum Lookup {
    /// The stream is registered.
    Live(Arc<StreamShared>),
    /// The stream existed and has been removed.
    Stale,
    /// No stream with this id was ever opened.
    Unopened,
}

/// Streams of one session, indexed by id.
///
/// Entries live in a slot vector; freed slots are reused for later streams
/// so the table does not grow with the total number of streams ever opened.
#[derive(Debug)]
pub(crate) struct StreamTable {
    role: Role,
    slots: Vec<Option<Arc<StreamShared>>>,
    free: Vec<usize>,
    index: HashMap<StreamId, usize>,
    next_local: u32,
    highest_remote: u32,
    reset_ids: HashSet<StreamId>,
    reset_order: VecDeque<StreamId>,
    closed: bool,
}

impl StreamTable {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_local: role.first_stream_id(),
            highest_remote: 0,
            reset_ids: HashSet::new(),
            reset_order: VecDeque::new(),
            closed: false,
        }
    }

    /// Reserve the next local id.
    pub(crate) fn allocate_local(&mut self) -> MuxResult<StreamId> {
        if self.next_local > MAX_STREAM_ID {
            return Err(MuxError::StreamsExhausted);
        }
        let id = StreamId::new(self.next_local);
        // May step past MAX_STREAM_ID; the check above catches it next time.
        self.next_local += 2;
        Ok(id)
    }

    /// Record that the peer opened `id`.
    ///
    /// Fails unless `id` has peer parity and is above every peer id seen.
    pub(crate) fn accept_remote(&mut self, id: StreamId) -> Result<(), &'static str> {
        if self.role.owns(id) {
            return Err("peer opened a stream with our parity");
        }
        if id.value() <= self.highest_remote {
            return Err("peer reused or reordered a stream id");
        }
        self.highest_remote = id.value();
        Ok(())
    }

    pub(crate) fn insert(&mut self, stream: Arc<StreamShared>) {
        let id = stream.id();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(stream);
                slot
            }
            None => {
                self.slots.push(Some(stream));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<&Arc<StreamShared>> {
        self.index
            .get(&id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub(crate) fn remove(&mut self, id: StreamId) -> Option<Arc<StreamShared>> {
        let slot = self.index.remove(&id)?;
        self.free.push(slot);
        self.slots[slot].take()
    }

    pub(crate) fn lookup(&self, id: StreamId) -> Lookup {
        if let Some(stream) = self.get(id) {
            return Lookup::Live(stream.clone());
        }
        let seen = if self.role.owns(id) {
            id.value() < self.next_local
        } else {
            id.value() <= self.highest_remote
        };
        if seen { Lookup::Stale } else { Lookup::Unopened }
    }

    /// Remember that this side reset `id`. Only the most recent
    /// `RESET_ID_MEMORY` ids are kept.
    pub(crate) fn note_reset(&mut self, id: StreamId) {
        if !self.reset_ids.insert(id) {
            return;
        }
        self.reset_order.push_back(id);
        if self.reset_order.len() > RESET_ID_MEMORY {
            if let Some(oldest) = self.reset_order.pop_front() {
                self.reset_ids.remove(&oldest);
            }
        }
    }

    /// Whether this side recently reset `id`.
    pub(crate) fn was_reset(&self, id: StreamId) -> bool {
        self.reset_ids.contains(&id)
    }

    /// Local streams the peer never processed, per its GoAway.
    pub(crate) fn local_above(&self, last: StreamId) -> Vec<Arc<StreamShared>> {
        self.slots
            .iter()
            .flatten()
            .filter(|s| self.role.owns(s.id()) && s.id() > last)
            .cloned()
            .collect()
    }

    /// Mark closed and take every stream out.
    pub(crate) fn close(&mut self) -> Vec<Arc<StreamShared>> {
        self.closed = true;
        self.index.clear();
        self.free.clear();
        self.slots.drain(..).flatten().collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn highest_remote(&self) -> StreamId {
        StreamId::new(self.highest_remote)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::window::{RecvWindow, SendWindow};

    fn stream(id: u32) -> Arc<StreamShared> {
        Arc::new(StreamShared::new(
            StreamId::new(id),
            SendWindow::new(16),
            RecvWindow::new(16, 8),
        ))
    }

    #[test]
    fn test_allocation_parity() {
        let mut client = StreamTable::new(Role::Client);
        let mut server = StreamTable::new(Role::Server);

        let ids: Vec<u32> = (0..3)
            .map(|_| client.allocate_local().unwrap().value())
            .collect();
        assert_eq!(ids, [1, 3, 5]);

        let ids: Vec<u32> = (0..3)
            .map(|_| server.allocate_local().unwrap().value())
            .collect();
        assert_eq!(ids, [2, 4, 6]);
    }

    #[test]
    fn test_allocation_exhaustion() {
        let mut table = StreamTable::new(Role::Client);
        table.next_local = MAX_STREAM_ID;
        assert_eq!(table.allocate_local().unwrap(), StreamId::MAX);
        assert!(matches!(
            table.allocate_local(),
            Err(MuxError::StreamsExhausted)
        ));

        let mut table = StreamTable::new(Role::Server);
        table.next_local = MAX_STREAM_ID - 1;
        assert!(table.allocate_local().is_ok());
        assert!(table.allocate_local().is_err());
    }

    #[test]
    fn test_accept_remote_rules() {
        let mut table = StreamTable::new(Role::Server);
        assert!(table.accept_remote(StreamId::new(2)).is_err());
        table.accept_remote(StreamId::new(3)).unwrap();
        assert!(table.accept_remote(StreamId::new(1)).is_err());
        assert!(table.accept_remote(StreamId::new(3)).is_err());
        table.accept_remote(StreamId::new(7)).unwrap();
        assert_eq!(table.highest_remote(), StreamId::new(7));
    }

    #[test]
    fn test_lookup_and_slot_reuse() {
        let mut table = StreamTable::new(Role::Client);
        let id = table.allocate_local().unwrap();
        table.insert(stream(id.value()));
        table.accept_remote(StreamId::new(2)).unwrap();
        table.insert(stream(2));
        assert_eq!(table.len(), 2);

        assert!(matches!(table.lookup(id), Lookup::Live(_)));
        assert!(table.remove(id).is_some());
        assert!(matches!(table.lookup(id), Lookup::Stale));
        assert!(matches!(table.lookup(StreamId::new(3)), Lookup::Unopened));
        assert!(matches!(table.lookup(StreamId::new(4)), Lookup::Unopened));

        let next = table.allocate_local().unwrap();
        table.insert(stream(next.value()));
        assert_eq!(table.slots.len(), 2);
        assert!(matches!(table.lookup(next), Lookup::Live(_)));
    }

    #[test]
    fn test_close_drains() {
        let mut table = StreamTable::new(Role::Client);
        for _ in 0..3 {
            let id = table.allocate_local().unwrap();
            table.insert(stream(id.value()));
        }
        assert_eq!(table.local_above(StreamId::new(1)).len(), 2);

        let drained = table.close();
        assert_eq!(drained.len(), 3);
        assert!(table.is_closed());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_reset_memory_is_bounded() {
        let mut table = StreamTable::new(Role::Server);
        table.note_reset(StreamId::new(1));
        table.note_reset(StreamId::new(1));
        assert!(table.was_reset(StreamId::new(1)));
        assert!(!table.was_reset(StreamId::new(3)));

        for n in 1..=RESET_ID_MEMORY as u32 {
            table.note_reset(StreamId::new(2 * n + 1));
        }
        assert!(!table.was_reset(StreamId::new(1)));
        assert!(table.was_reset(StreamId::new(3)));
        assert_eq!(table.reset_order.len(), RESET_ID_MEMORY);
        assert_eq!(table.reset_ids.len(), RESET_ID_MEMORY);
    }
}
