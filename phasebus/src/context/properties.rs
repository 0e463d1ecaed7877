//! Typed property storage for messages.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A property key that fixes the type of the value stored under it.
///
/// Keys are usually declared as constants:
///
/// ```
/// use phasebus::context::{Key, Properties};
///
/// const RETRIES: Key<u32> = Key::new("example.retries");
///
/// let mut props = Properties::new();
/// props.insert(RETRIES, 3);
/// assert_eq!(props.get(RETRIES), Some(&3));
/// ```
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Declares a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.name).finish()
    }
}

type Value = Arc<dyn Any + Send + Sync>;

/// A map of typed values keyed by [`Key`].
///
/// Values are reference counted, so cloning a property map is cheap and the
/// clone shares values with the original. Reading a key with a type other
/// than the one it was written with yields `None`.
#[derive(Clone, Default)]
pub struct Properties {
    values: HashMap<&'static str, Value>,
}

impl Properties {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous one.
    pub fn insert<T>(&mut self, key: Key<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.values.insert(key.name, Arc::new(value));
    }

    /// Reads a value.
    #[must_use]
    pub fn get<T>(&self, key: Key<T>) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get(key.name)?.downcast_ref::<T>()
    }

    /// Reads a value as a shared pointer.
    #[must_use]
    pub fn get_arc<T>(&self, key: Key<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.values.get(key.name)?.clone().downcast::<T>().ok()
    }

    /// Returns true if a value of the key's type is present.
    #[must_use]
    pub fn contains<T>(&self, key: Key<T>) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.get(key).is_some()
    }

    /// Removes a value, returning true if one was present.
    pub fn remove<T>(&mut self, key: Key<T>) -> bool {
        self.values.remove(key.name).is_some()
    }

    /// Copies every entry of `other` that is not already set here.
    pub fn fill_from(&mut self, other: &Self) {
        for (name, value) in &other.values {
            self.values.entry(name).or_insert_with(|| value.clone());
        }
    }

    /// Returns the stored key names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.values.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
