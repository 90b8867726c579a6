//! Decoded, multi-valued URL query parameters.

use std::borrow::Cow;
use std::collections::HashMap;

/// Query parameters parsed from a request's query string.
///
/// Keys may repeat (`?tag=a&tag=b`); [`get`](Self::get) returns the first
/// value and [`get_all`](Self::get_all) every value in order. Keys and values
/// have `+` turned into a space and are then percent-decoded.
///
/// # Examples
///
/// ```
/// use joker::http::QueryParams;
///
/// let query = QueryParams::parse("name=J%C3%B6rg&tag=a&tag=b+c");
/// assert_eq!(query.get("name"), Some("Jörg"));
/// assert_eq!(query.get_all("tag"), &["a".to_string(), "b c".to_string()]);
/// assert_eq!(query.get("missing"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    map: HashMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw query string (without the leading `?`).
    ///
    /// Empty pairs are skipped. A pair without `=` maps to an empty value.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.append(decode(key), decode(value));
        }
        params
    }

    /// Adds a value for `key`, keeping any existing values.
    pub fn append(&mut self, key: String, value: String) {
        self.map.entry(key).or_default().push(value);
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values for `key`, or an empty slice.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// Malformed percent escapes are kept verbatim rather than rejected.
fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced).map(Cow::into_owned);
    decoded.unwrap_or(spaced)
}
