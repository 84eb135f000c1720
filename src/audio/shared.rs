//! Guarded containers shared between the command path and the playback
//! completion path.
//!
//! Every read and write on a container takes the same [`parking_lot::Mutex`],
//! so an operation is never observed half-applied from another task or thread.
//! Out-of-range reads return `None` instead of failing.

use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

/// Mapa protegido por un único lock
#[derive(Debug)]
pub struct SharedMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        self.inner.lock().insert(key, value);
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Returns the value for `key`, building it with `factory` if absent.
    ///
    /// The lookup and the insertion happen under one acquisition of the guard,
    /// so concurrent callers for the same key observe a single construction.
    /// The flag is `true` when this call created the value.
    pub fn get_or_insert_with(&self, key: K, factory: impl FnOnce() -> V) -> (V, bool) {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(&key) {
            return (existing.clone(), false);
        }
        let value = factory();
        map.insert(key, value.clone());
        (value, true)
    }

    /// Applies `f` to the value in place; `None` if the key is absent.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.inner.lock().get_mut(key).map(f)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copia de las entradas para iterar sin mantener el lock
    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Secuencia ordenada protegida por un único lock
#[derive(Debug)]
pub struct SharedList<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for SharedList<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }
}

#[allow(dead_code)]
impl<T: Clone> SharedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.lock().get(index).cloned()
    }

    /// Replaces the item at `index`; returns `false` when out of range.
    pub fn set(&self, index: usize, value: T) -> bool {
        match self.inner.lock().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Appends and returns the new length.
    pub fn append(&self, value: T) -> usize {
        let mut items = self.inner.lock();
        items.push_back(value);
        items.len()
    }

    /// Appends all values in order while holding the guard once.
    pub fn extend(&self, values: impl IntoIterator<Item = T>) -> usize {
        let mut items = self.inner.lock();
        items.extend(values);
        items.len()
    }

    /// Removes the first item equal to `value`.
    pub fn remove(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let mut items = self.inner.lock();
        match items.iter().position(|item| item == value) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn pop(&self, index: usize) -> Option<T> {
        self.inner.lock().remove(index)
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Removes up to `count` items from the head, in queue order.
    pub fn drain_front(&self, count: usize) -> Vec<T> {
        let mut items = self.inner.lock();
        let count = count.min(items.len());
        items.drain(..count).collect()
    }

    /// Removes up to `count` items from the tail, returned in queue order.
    pub fn drain_back(&self, count: usize) -> Vec<T> {
        let mut items = self.inner.lock();
        let start = items.len().saturating_sub(count);
        items.drain(start..).collect()
    }

    /// Vacía la secuencia y devuelve cuántos elementos tenía
    pub fn clear(&self) -> usize {
        let mut items = self.inner.lock();
        let cleared = items.len();
        items.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot in queue order. Iteration never holds the guard.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn iter(&self) -> std::vec::IntoIter<T> {
        self.snapshot().into_iter()
    }
}
