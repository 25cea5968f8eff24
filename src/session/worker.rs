//! Worker membership pool of a session.
//!
//! The pool tracks *which* workers participate in a session, nothing about
//! how work is divided between them; scheduling lives with the caller. Each
//! assigned worker appears exactly once and no ordering is exposed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identity of a worker assigned to a session, e.g. `"node07:1093-0.4"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unordered, identity-deduplicated membership set.
#[derive(Debug, Default)]
pub struct WorkerPool {
    members: HashSet<WorkerId>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker; re-adding an existing member leaves the pool unchanged.
    pub fn add(&mut self, worker: WorkerId) {
        self.members.insert(worker);
    }

    /// Removes a worker; removing a non-member is a no-op.
    pub fn remove(&mut self, worker: &WorkerId) {
        self.members.remove(worker);
    }

    pub fn contains(&self, worker: &WorkerId) -> bool {
        self.members.contains(worker)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Snapshot of the current membership, in no particular order.
    pub fn snapshot(&self) -> Vec<WorkerId> {
        self.members.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut pool = WorkerPool::new();
        pool.add(WorkerId::new("node01:1093-0.0"));
        pool.add(WorkerId::new("node01:1093-0.0"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_absent_worker_is_noop() {
        let mut pool = WorkerPool::new();
        pool.add(WorkerId::new("node01:1093-0.0"));
        pool.remove(&WorkerId::new("node02:1093-0.1"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_then_count() {
        let mut pool = WorkerPool::new();
        pool.add(WorkerId::new("node01:1093-0.0"));
        pool.add(WorkerId::new("node02:1093-0.1"));
        pool.remove(&WorkerId::new("node01:1093-0.0"));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&WorkerId::new("node02:1093-0.1")));
    }

    #[test]
    fn test_clear_empties_pool() {
        let mut pool = WorkerPool::new();
        pool.add(WorkerId::new("a"));
        pool.add(WorkerId::new("b"));
        pool.clear();
        assert!(pool.is_empty());
    }
}
