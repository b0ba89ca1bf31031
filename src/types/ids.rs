//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different identifiers (e.g., passing
//! a raw tag string where a canonical tag key is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator placed between tags in a canonical [`TagKey`].
///
/// Upstream tag syntax never contains whitespace, so a single space is
/// unambiguous and the key doubles as the tag expression sent upstream.
pub const TAG_KEY_SEPARATOR: &str = " ";

/// An upstream item (post) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(n: u64) -> Self {
        ItemId(n)
    }
}

/// Canonical identifier for a set of tags.
///
/// Built by trimming, lower-casing, sorting and deduplicating the tags, so
/// `["Foo", "bar"]` and `["BAR", "foo"]` yield the same key. The key is both
/// the unit of poll coalescing and the event bus topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagKey(String);

impl TagKey {
    /// Canonicalizes a tag set into a key.
    ///
    /// Empty and whitespace-only entries are dropped. Returns `None` if no tag
    /// survives.
    pub fn from_tags<I, S>(tags: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical: Vec<String> = tags
            .into_iter()
            .flat_map(|t| {
                t.as_ref()
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
            })
            .collect();
        canonical.sort();
        canonical.dedup();

        if canonical.is_empty() {
            None
        } else {
            Some(TagKey(canonical.join(TAG_KEY_SEPARATOR)))
        }
    }

    /// Returns the individual tags in canonical order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.split(TAG_KEY_SEPARATOR)
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
