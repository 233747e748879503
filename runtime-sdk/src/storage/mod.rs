//! Storage.
mod memory;
mod overlay;
mod prefix;
mod typed;

/// An iterator over ordered key-value pairs of a store.
pub type StoreIterator<'store> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'store>;

/// A key-value store.
///
/// Iteration is always in ascending key order so that anything derived from it is
/// deterministic.
pub trait Store {
    /// Fetch entry with given key.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Update entry with given key to the given value.
    fn insert(&mut self, key: &[u8], value: &[u8]);

    /// Remove entry with given key.
    fn remove(&mut self, key: &[u8]);

    /// Returns an iterator over all entries with keys greater than or equal to `start`.
    fn iter_from(&self, start: &[u8]) -> StoreIterator<'_>;

    /// Returns an iterator over the whole store.
    fn iter(&self) -> StoreIterator<'_> {
        self.iter_from(&[])
    }
}

impl<S: Store + ?Sized> Store for &mut S {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        S::get(self, key)
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        S::insert(self, key, value)
    }

    fn remove(&mut self, key: &[u8]) {
        S::remove(self, key)
    }

    fn iter_from(&self, start: &[u8]) -> StoreIterator<'_> {
        S::iter_from(self, start)
    }
}

pub use memory::MemoryStore;
pub use overlay::OverlayStore;
pub use prefix::PrefixStore;
pub use typed::TypedStore;
