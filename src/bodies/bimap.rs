use std::collections::HashMap;
use std::hash::Hash;

/// Bidirectional one-to-one map, used to resolve body names to arena ids and back.
#[derive(Debug, Clone)]
pub struct BiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    forward: HashMap<K, V>,
    reverse: HashMap<V, K>,
}

impl<K, V> Default for BiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BiMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Return the value bound to `key`, binding `make_value()` first if the key is new.
    ///
    /// The second element of the tuple tells whether a new binding was created.
    pub fn get_or_insert_with(&mut self, key: K, make_value: impl FnOnce() -> V) -> (V, bool) {
        if let Some(value) = self.forward.get(&key) {
            return (value.clone(), false);
        }
        let value = make_value();
        self.reverse.insert(value.clone(), key.clone());
        self.forward.insert(key, value.clone());
        (value, true)
    }

    pub fn get_by_key(&self, key: &K) -> Option<&V> {
        self.forward.get(key)
    }

    pub fn get_by_value(&self, value: &V) -> Option<&K> {
        self.reverse.get(value)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
