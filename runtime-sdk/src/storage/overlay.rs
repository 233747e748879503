use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    iter::Peekable,
};

use super::{Store, StoreIterator};

/// A copy-on-write branch of a parent store.
///
/// Writes are buffered until `commit` is called. Dropping the overlay discards them.
pub struct OverlayStore<S: Store> {
    parent: S,
    overlay: BTreeMap<Vec<u8>, Vec<u8>>,
    dirty: BTreeSet<Vec<u8>>,
}

impl<S: Store> OverlayStore<S> {
    /// Create a new overlay store on top of the given parent.
    pub fn new(parent: S) -> Self {
        Self {
            parent,
            overlay: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Whether no writes have been buffered.
    pub fn is_clean(&self) -> bool {
        self.dirty.is_empty()
    }

    /// Write all buffered updates to the parent store.
    pub fn commit(mut self) -> S {
        // Insert all items present in the overlay.
        for (key, value) in self.overlay {
            self.dirty.remove(&key);
            self.parent.insert(&key, &value);
        }

        // Any remaining dirty items must have been removed.
        for key in &self.dirty {
            self.parent.remove(key);
        }

        self.parent
    }
}

impl<S: Store> Store for OverlayStore<S> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        // For dirty values, check the overlay.
        if self.dirty.contains(key) {
            return self.overlay.get(key).cloned();
        }

        // Otherwise fetch from parent store.
        self.parent.get(key)
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.overlay.insert(key.to_owned(), value.to_owned());
        self.dirty.insert(key.to_owned());
    }

    fn remove(&mut self, key: &[u8]) {
        // For dirty values, remove from the overlay.
        if self.dirty.contains(key) {
            self.overlay.remove(key);
            return;
        }

        // Since we don't care about the previous value, we can just record an update.
        self.dirty.insert(key.to_owned());
    }

    fn iter_from(&self, start: &[u8]) -> StoreIterator<'_> {
        Box::new(OverlayStoreIterator {
            dirty: &self.dirty,
            parent: self.parent.iter_from(start).peekable(),
            overlay: self.overlay.range(start.to_vec()..).peekable(),
        })
    }
}

/// An iterator merging the parent entries with the overlay entries.
struct OverlayStoreIterator<'store> {
    dirty: &'store BTreeSet<Vec<u8>>,
    parent: Peekable<StoreIterator<'store>>,
    overlay: Peekable<btree_map::Range<'store, Vec<u8>, Vec<u8>>>,
}

impl<'store> Iterator for OverlayStoreIterator<'store> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        // Skip over any dirty entries from the parent iterator.
        while let Some((key, _)) = self.parent.peek() {
            if !self.dirty.contains(key) {
                break;
            }
            self.parent.next();
        }

        let take_parent = match (self.parent.peek(), self.overlay.peek()) {
            (Some((p_key, _)), Some((o_key, _))) => p_key < *o_key,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        if take_parent {
            self.parent.next()
        } else {
            self.overlay.next().map(|(k, v)| (k.clone(), v.clone()))
        }
    }
}
