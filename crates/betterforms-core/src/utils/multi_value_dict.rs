//! Multi-valued mapping used for submitted data and uploaded files.
//!
//! A submission can repeat a key (`tags=a&tags=b`, or several files under one
//! input). [`MultiValueDict`] keeps every value in submission order; plain
//! lookups see the last one.

use std::borrow::Borrow;
use std::collections::hash_map;
use std::collections::HashMap;
use std::hash::Hash;

/// Maps each key to the ordered list of values submitted under it.
///
/// Lookups accept any borrowed form of the key, so a
/// `MultiValueDict<String, _>` is queried with a `&str`.
///
/// # Examples
///
/// ```
/// use betterforms_core::utils::MultiValueDict;
///
/// let tags: MultiValueDict<String, String> = [("tag", "a"), ("tag", "b")]
///     .into_iter()
///     .map(|(k, v)| (k.to_string(), v.to_string()))
///     .collect();
///
/// assert_eq!(tags.get("tag").map(String::as_str), Some("b"));
/// assert_eq!(tags.get_list("tag").map(Vec::len), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiValueDict<K: Eq + Hash, V> {
    entries: HashMap<K, Vec<V>>,
}

impl<K: Eq + Hash, V> Default for MultiValueDict<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> MultiValueDict<K, V> {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last value submitted under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)?.last()
    }

    /// Returns every value submitted under `key`, in submission order.
    pub fn get_list<Q>(&self, key: &Q) -> Option<&Vec<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Returns `true` if `key` has at least one value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Replaces every value under `key` with `value`.
    pub fn set(&mut self, key: K, value: V) {
        self.entries.insert(key, vec![value]);
    }

    /// Adds `value` after the existing values under `key`.
    pub fn append(&mut self, key: K, value: V) {
        self.entries.entry(key).or_default().push(value);
    }

    /// Iterates over the distinct keys.
    pub fn keys(&self) -> hash_map::Keys<'_, K, Vec<V>> {
        self.entries.keys()
    }

    /// Iterates over `(key, values)` pairs.
    pub fn iter(&self) -> hash_map::Iter<'_, K, Vec<V>> {
        self.entries.iter()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no key is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for MultiValueDict<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (key, value) in iter {
            dict.append(key, value);
        }
        dict
    }
}

impl<'a, K: Eq + Hash, V> IntoIterator for &'a MultiValueDict<K, V> {
    type Item = (&'a K, &'a Vec<V>);
    type IntoIter = hash_map::Iter<'a, K, Vec<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> MultiValueDict<String, &'static str> {
        [("docs", "a.pdf"), ("docs", "b.pdf"), ("avatar", "me.png")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_repeated_keys_keep_submission_order() {
        let dict = files();
        assert_eq!(dict.get_list("docs"), Some(&vec!["a.pdf", "b.pdf"]));
        assert_eq!(dict.get("docs"), Some(&"b.pdf"));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn test_borrowed_lookup() {
        let dict = files();
        let key = String::from("avatar");
        assert_eq!(dict.get(key.as_str()), Some(&"me.png"));
        assert!(dict.contains_key(&key));
        assert!(!dict.contains_key("missing"));
        assert_eq!(dict.get("missing"), None);
    }

    #[test]
    fn test_set_discards_previous_values() {
        let mut dict = files();
        dict.set("docs".to_string(), "c.pdf");
        assert_eq!(dict.get_list("docs"), Some(&vec!["c.pdf"]));
    }

    #[test]
    fn test_empty() {
        let dict: MultiValueDict<String, u8> = MultiValueDict::new();
        assert!(dict.is_empty());
        assert_eq!(dict.iter().count(), 0);
    }
}
