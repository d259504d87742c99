//! Submitted form data.
//!
//! One [`QueryDict`] is shared by every sub-form of a multi-form. Keys carry
//! the sub-form prefix (`user-username`, `profile-bio`), and each sub-form
//! reads only its own keys.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use crate::error::{FormsError, FormsResult};
use crate::utils::MultiValueDict;

/// Submitted key/value data, frozen once parsed.
///
/// A parsed dictionary refuses [`set`](Self::set) and
/// [`append`](Self::append); [`copy`](Self::copy) gives an editable one.
///
/// ```
/// use betterforms_core::QueryDict;
///
/// let data = QueryDict::parse("user-name=alice&profile-bio=hello+there");
/// assert_eq!(data.get("profile-bio"), Some("hello there"));
///
/// let mut edited = data.copy();
/// edited.set("user-name", "bob").unwrap();
/// assert_eq!(edited.get("user-name"), Some("bob"));
/// assert_eq!(data.get("user-name"), Some("alice"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDict {
    values: MultiValueDict<String, String>,
    editable: bool,
}

impl QueryDict {
    /// An empty, frozen dictionary: what an unbound form sees.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// `+` decodes to a space, a pair without `=` gets an empty value, and
    /// repeated keys keep every value.
    pub fn parse(body: &str) -> Self {
        body.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode(key), decode(value))
            })
            .collect()
    }

    /// Builds a frozen dictionary from already decoded pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
    }

    /// The last value submitted under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Every value submitted under `key`, in order.
    pub fn get_list(&self, key: &str) -> Option<&Vec<String>> {
        self.values.get_list(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub const fn is_editable(&self) -> bool {
        self.editable
    }

    /// An editable clone.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            values: self.values.clone(),
            editable: true,
        }
    }

    /// Replaces the values under `key`.
    pub fn set(&mut self, key: &str, value: &str) -> FormsResult<()> {
        self.ensure_editable()?;
        self.values.set(key.to_string(), value.to_string());
        Ok(())
    }

    /// Adds a value after the existing ones under `key`.
    pub fn append(&mut self, key: &str, value: &str) -> FormsResult<()> {
        self.ensure_editable()?;
        self.values.append(key.to_string(), value.to_string());
        Ok(())
    }

    /// Re-encodes the data with pairs sorted, so equal data encodes equally.
    pub fn urlencode(&self) -> String {
        let mut pairs: Vec<String> = self
            .values
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| format!("{}={}", encode(key), encode(value)))
            })
            .collect();
        pairs.sort_unstable();
        pairs.join("&")
    }

    fn ensure_editable(&self) -> FormsResult<()> {
        if self.editable {
            Ok(())
        } else {
            Err(FormsError::ImmutableQueryDict)
        }
    }
}

impl FromIterator<(String, String)> for QueryDict {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            editable: false,
        }
    }
}

impl fmt::Display for QueryDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urlencode())
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

fn encode(text: &str) -> String {
    utf8_percent_encode(text, NON_ALPHANUMERIC).to_string()
}
