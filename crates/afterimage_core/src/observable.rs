//! Observer lists
//!
//! Passes and effect layers announce lifecycle points ("activate", "apply",
//! "before compose", ...) to user callbacks. Callbacks run synchronously, in
//! registration order, and are removed through the handle returned when they
//! were added. There is no global dispatcher: each object owns its lists.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

/// Handle returned by `add`, used to remove the callback later
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverHandle(pub u64);

/// Observer callback; receives the event payload mutably so it can feed
/// values back to the notifier (e.g. per-frame uniforms)
pub type Observer<E> = Box<dyn FnMut(&mut E) + Send>;

struct Entry<E> {
    handle: ObserverHandle,
    callback: Observer<E>,
}

/// Callback lists keyed by event name.
///
/// Handles are unique across all keys, so `remove` does not need to know
/// which event a callback was registered for.
pub struct ObserverRegistry<K: Ord + Copy, E> {
    lists: BTreeMap<K, Vec<Entry<E>>>,
    next_handle: u64,
}

impl<K: Ord + Copy, E> ObserverRegistry<K, E> {
    pub fn new() -> Self {
        Self {
            lists: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Register a callback for `event`
    pub fn add<F>(&mut self, event: K, callback: F) -> ObserverHandle
    where
        F: FnMut(&mut E) + Send + 'static,
    {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;
        self.lists.entry(event).or_default().push(Entry {
            handle,
            callback: Box::new(callback),
        });
        handle
    }

    /// Remove a callback from whichever event it was registered on
    pub fn remove(&mut self, handle: ObserverHandle) -> bool {
        for list in self.lists.values_mut() {
            if let Some(pos) = list.iter().position(|e| e.handle == handle) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Invoke the callbacks registered for `event`, in registration order
    pub fn notify(&mut self, event: K, payload: &mut E) {
        if let Some(list) = self.lists.get_mut(&event) {
            for entry in list.iter_mut() {
                (entry.callback)(payload);
            }
        }
    }

    pub fn has_observers(&self, event: K) -> bool {
        self.lists.get(&event).map_or(false, |l| !l.is_empty())
    }

    /// Number of callbacks registered for `event`
    pub fn count(&self, event: K) -> usize {
        self.lists.get(&event).map_or(0, |l| l.len())
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

impl<K: Ord + Copy, E> Default for ObserverRegistry<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy + fmt::Debug, E> fmt::Debug for ObserverRegistry<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, list) in &self.lists {
            map.entry(key, &list.len());
        }
        map.finish()
    }
}
