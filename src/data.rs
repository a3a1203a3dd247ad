//! Data structures for passing keys into, and results out of, a fetch
//! function.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::hash::Hash;
use std::slice;
use std::vec;

/// The set of keys passed to a fetch function for one batch. The keys are
/// guaranteed to be:
///
/// - Unique
/// - Between 1 and the configured `max_batch_size` in number
/// - In an arbitrary order
///
/// Besides iterating the keys, a `KeySet` has helpers for the common ways of
/// shaping a backend's response into the maps of a [`Fetched`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet<Key> {
    keys: Vec<Key>,
}

impl<Key> KeySet<Key> {
    /// The caller guarantees that `keys` has no duplicates; the pending batch
    /// builds the set from its own map keys.
    pub(crate) fn from_distinct(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> + Clone {
        self.keys.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Key] {
        &self.keys
    }

    pub fn into_vec(self) -> Vec<Key> {
        self.keys
    }
}

impl<Key: Eq + Hash + Clone> KeySet<Key> {
    /// Assign the same error to every key. This is for fetch functions whose
    /// backend fails wholesale, such as a dropped database connection:
    ///
    /// ```
    /// # use batchcoalesce::{Fetched, KeySet};
    /// # use std::collections::HashMap;
    /// fn fetch(keys: KeySet<u32>) -> Fetched<u32, String, String> {
    ///     let rows: Result<HashMap<u32, String>, String> = Err("connection refused".into());
    ///
    ///     match rows {
    ///         Ok(values) => Fetched::from_values(values),
    ///         Err(err) => Fetched::from_errors(keys.err_for_all(err)),
    ///     }
    /// }
    /// ```
    pub fn err_for_all<Error: Clone>(&self, error: Error) -> HashMap<Key, Error> {
        self.keys
            .iter()
            .map(|key| (key.clone(), error.clone()))
            .collect()
    }

    /// For fetch functions that return a list per key, where an empty list is
    /// a legitimate answer: give every requested key that is missing from
    /// `current` an empty list, so it isn't reported as a missing response.
    pub fn fill_empty<T>(&self, mut current: HashMap<Key, Vec<T>>) -> HashMap<Key, Vec<T>> {
        for key in &self.keys {
            if !current.contains_key(key) {
                current.insert(key.clone(), Vec::new());
            }
        }

        current
    }

    fn lookup(&self) -> HashSet<&Key> {
        self.keys.iter().collect()
    }

    /// Key each value by its own key, as reported by [`KeyedEntry`]. Values
    /// whose key wasn't requested are discarded. If several values share a
    /// key, `on_duplicate` picks which one is kept.
    pub fn values_from_iter<Value: KeyedEntry<Key>>(
        &self,
        on_duplicate: OnDuplicate,
        values: impl IntoIterator<Item = Value>,
    ) -> HashMap<Key, Value> {
        let requested = self.lookup();
        let mut keyed = HashMap::with_capacity(self.len());

        for value in values {
            if !requested.contains(value.get_key()) {
                continue;
            }

            match keyed.entry(value.get_key().clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
                Entry::Occupied(mut entry) => match on_duplicate {
                    OnDuplicate::KeepFirst => {}
                    OnDuplicate::KeepLast => {
                        entry.insert(value);
                    }
                },
            }
        }

        keyed
    }

    /// Group values by their own key, as reported by [`KeyedEntry`], then
    /// [`fill_empty`][KeySet::fill_empty]: every requested key ends up with a
    /// (possibly empty) list. Values whose key wasn't requested are
    /// discarded.
    pub fn groups_from_iter<Value: KeyedEntry<Key>>(
        &self,
        values: impl IntoIterator<Item = Value>,
    ) -> HashMap<Key, Vec<Value>> {
        let requested = self.lookup();
        let mut groups: HashMap<Key, Vec<Value>> = HashMap::with_capacity(self.len());

        for value in values {
            if requested.contains(value.get_key()) {
                groups
                    .entry(value.get_key().clone())
                    .or_default()
                    .push(value);
            }
        }

        self.fill_empty(groups)
    }
}

impl<Key> IntoIterator for KeySet<Key> {
    type Item = Key;
    type IntoIter = vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a, Key> IntoIterator for &'a KeySet<Key> {
    type Item = &'a Key;
    type IntoIter = slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// A value that knows its own key, such as a database row that includes its
/// primary key column.
pub trait KeyedEntry<Key> {
    fn get_key(&self) -> &Key;
}

/// What [`KeySet::values_from_iter`] does when several values share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    KeepFirst,
    KeepLast,
}

/// The output of a fetch function: a value or an error for each key.
///
/// Keys that appear in neither map resolve with
/// [`LoadError::MissingResponse`][crate::LoadError::MissingResponse]. A key
/// that appears in both resolves with its value. Keys that weren't requested
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<Key: Eq + Hash, Value, Error> {
    pub values: HashMap<Key, Value>,
    pub errors: HashMap<Key, Error>,
}

impl<Key: Eq + Hash, Value, Error> Fetched<Key, Value, Error> {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn from_values(values: HashMap<Key, Value>) -> Self {
        Self {
            values,
            errors: HashMap::new(),
        }
    }

    pub fn from_errors(errors: HashMap<Key, Error>) -> Self {
        Self {
            values: HashMap::new(),
            errors,
        }
    }

    pub fn with_value(mut self, key: Key, value: Value) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn with_error(mut self, key: Key, error: Error) -> Self {
        self.errors.insert(key, error);
        self
    }

    /// Extract the outcome for a single key, preferring a value over an
    /// error. `None` means the fetch function didn't account for the key.
    pub(crate) fn take(&mut self, key: &Key) -> Option<Result<Value, Error>> {
        match self.values.remove(key) {
            Some(value) => {
                self.errors.remove(key);
                Some(Ok(value))
            }
            None => self.errors.remove(key).map(Err),
        }
    }

    /// The number of entries that remain after every requested key was
    /// taken; these are keys the fetch function returned without being
    /// asked.
    pub(crate) fn leftover(&self) -> usize {
        self.values.len() + self.errors.len()
    }
}

impl<Key: Eq + Hash + Clone, Value, Error: Clone> Fetched<Key, Value, Error> {
    /// Report the same error for every key in the set.
    pub fn fail_all(keys: &KeySet<Key>, error: Error) -> Self {
        Self::from_errors(keys.err_for_all(error))
    }
}

impl<Key: Eq + Hash, Value, Error> Default for Fetched<Key, Value, Error> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Key: Eq + Hash, Value, Error> From<(HashMap<Key, Value>, HashMap<Key, Error>)>
    for Fetched<Key, Value, Error>
{
    fn from((values, errors): (HashMap<Key, Value>, HashMap<Key, Error>)) -> Self {
        Self { values, errors }
    }
}
