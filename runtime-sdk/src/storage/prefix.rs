use super::{Store, StoreIterator};

/// A key-value store that prefixes all keys with the given prefix.
pub struct PrefixStore<S: Store, P: AsRef<[u8]>> {
    parent: S,
    prefix: P,
}

impl<S: Store, P: AsRef<[u8]>> PrefixStore<S, P> {
    /// Create a new prefix store with the given prefix.
    pub fn new(parent: S, prefix: P) -> Self {
        Self { parent, prefix }
    }
}

impl<S: Store, P: AsRef<[u8]>> Store for PrefixStore<S, P> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.parent.get(&[self.prefix.as_ref(), key].concat())
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.parent
            .insert(&[self.prefix.as_ref(), key].concat(), value);
    }

    fn remove(&mut self, key: &[u8]) {
        self.parent.remove(&[self.prefix.as_ref(), key].concat());
    }

    fn iter_from(&self, start: &[u8]) -> StoreIterator<'_> {
        let prefix = self.prefix.as_ref();
        Box::new(
            self.parent
                .iter_from(&[prefix, start].concat())
                .take_while(move |(k, _)| k.starts_with(prefix))
                .map(move |(mut k, v)| (k.split_off(prefix.len()), v)),
        )
    }
}
