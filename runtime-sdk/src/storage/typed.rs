use std::{convert::TryFrom, marker::PhantomData};

use super::{Store, StoreIterator};

/// A key-value store that transparently handles serialization/deserialization.
pub struct TypedStore<S: Store> {
    parent: S,
}

impl<S: Store> TypedStore<S> {
    /// Create a new typed store.
    pub fn new(parent: S) -> Self {
        Self { parent }
    }

    /// Fetch entry with given key.
    pub fn get<K: AsRef<[u8]>, T: cbor::Decode>(&self, key: K) -> Option<T> {
        self.parent.get(key.as_ref()).map(|data| {
            cbor::from_slice(&data).unwrap_or_else(|e| panic!("corrupted storage value: {}", e))
        })
    }

    /// Update entry with given key to the given value.
    pub fn insert<K: AsRef<[u8]>, T: cbor::Encode>(&mut self, key: K, value: T) {
        self.parent.insert(key.as_ref(), &cbor::to_vec(value))
    }

    /// Remove entry with given key.
    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) {
        self.parent.remove(key.as_ref())
    }

    /// Iterate over all entries in ascending key order.
    pub fn iter<'store, K, V>(&'store self) -> TypedStoreIterator<'store, K, V>
    where
        K: for<'k> TryFrom<&'k [u8]>,
        V: cbor::Decode,
    {
        TypedStoreIterator::new(self.parent.iter())
    }
}

/// An iterator over the `TypedStore`.
pub struct TypedStoreIterator<'store, K, V>
where
    K: for<'k> TryFrom<&'k [u8]>,
    V: cbor::Decode,
{
    inner: StoreIterator<'store>,

    _key: PhantomData<K>,
    _value: PhantomData<V>,
}

impl<'store, K, V> TypedStoreIterator<'store, K, V>
where
    K: for<'k> TryFrom<&'k [u8]>,
    V: cbor::Decode,
{
    fn new(inner: StoreIterator<'store>) -> Self {
        Self {
            inner,
            _key: PhantomData,
            _value: PhantomData,
        }
    }
}

impl<'store, K, V, E> Iterator for TypedStoreIterator<'store, K, V>
where
    K: for<'k> TryFrom<&'k [u8], Error = E>,
    E: std::fmt::Display,
    V: cbor::Decode,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| {
            let key = K::try_from(k.as_slice()).unwrap_or_else(|e| panic!("corrupted storage key: {}", e));
            let value = cbor::from_slice(&v)
                .unwrap_or_else(|e| panic!("corrupted storage value: {}", e));
            (key, value)
        })
    }
}
