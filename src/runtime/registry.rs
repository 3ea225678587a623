// src/runtime/registry.rs

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Ids come from one process-wide counter so that a value handed out before
/// a `fini()` can never alias an object created afterwards.
static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// Allocates the next object id. Ids stay below `0x8000_0000` in practice;
/// protocols rely on pipe ids having the high bit clear.
pub(crate) fn next_handle() -> u32 {
  NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Maps open object ids to their engine state.
#[derive(Debug)]
pub(crate) struct HandleTable<V> {
  entries: RwLock<HashMap<u32, V>>,
}

impl<V: Clone> HandleTable<V> {
  pub(crate) fn new() -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
    }
  }

  pub(crate) fn insert(&self, id: u32, value: V) {
    self.entries.write().insert(id, value);
  }

  pub(crate) fn get(&self, id: u32) -> Option<V> {
    self.entries.read().get(&id).cloned()
  }

  pub(crate) fn remove(&self, id: u32) -> Option<V> {
    self.entries.write().remove(&id)
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.read().len()
  }

  /// Removes and returns every entry.
  pub(crate) fn drain(&self) -> Vec<V> {
    self.entries.write().drain().map(|(_, v)| v).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn handles_are_unique_and_nonzero() {
    let a = next_handle();
    let b = next_handle();
    assert_ne!(a, 0);
    assert!(b > a);
  }

  #[test]
  fn table_insert_get_remove() {
    let table = HandleTable::new();
    table.insert(1, "one");
    table.insert(2, "two");
    assert_eq!(table.get(1), Some("one"));
    assert_eq!(table.len(), 2);
    assert_eq!(table.remove(1), Some("one"));
    assert_eq!(table.get(1), None);
    assert_eq!(table.drain(), vec!["two"]);
    assert_eq!(table.len(), 0);
  }
}
