//! Identifier allocation for connections and mobs.
//!
//! Identifiers are drawn from the bounded domain `[1, MAX_ID)` with a
//! monotonically advancing cursor. The cursor skips over identifiers still
//! bound to live objects and wraps back to 1 at the domain maximum, so an id
//! is never reissued while in use and is only reused after every other id has
//! been issued at least once more recently.

use shared::MAX_ID;
use std::collections::HashSet;

#[derive(Debug)]
pub struct IdentifierPool {
    next: u32,
    live: HashSet<u32>,
}

impl Default for IdentifierPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierPool {
    pub fn new() -> Self {
        Self {
            next: 1,
            live: HashSet::new(),
        }
    }

    /// Allocates an identifier not currently bound to any live object.
    ///
    /// Liveness holds because live objects are bounded by configured
    /// capacity, which is far below the domain size.
    pub fn allocate(&mut self) -> u32 {
        while self.live.contains(&self.next) {
            self.next += 1;

            if self.next >= MAX_ID {
                self.next = 1;
            }
        }

        let id = self.next;
        self.live.insert(id);

        self.next = if id + 1 >= MAX_ID { 1 } else { id + 1 };

        id
    }

    /// Unbinds an identifier. Must be called only after all state referencing
    /// the id (timers, index entries) has been torn down, otherwise a
    /// reissued id could alias stale data.
    pub fn release(&mut self, id: u32) -> bool {
        self.live.remove(&id)
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.live.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Places the cursor at an arbitrary position. Test hook for exercising
    /// wraparound without issuing four billion ids.
    #[doc(hidden)]
    pub fn set_cursor(&mut self, next: u32) {
        self.next = next;
    }
}
