//! Parsed upstream items and their display view.
//!
//! An [`Item`] is built once by the upstream parser and then shared read-only
//! (behind an `Arc`) by every dispatcher subscribed to its tag key. The
//! [`DisplayView`] is computed at parse time so rendering never recomputes it.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::ids::ItemId;
use crate::text::{format_size, humanize_tag, readable_list};

/// Content rating classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    /// `g` (general) or `s` (safe / sensitive).
    Safe,
    /// `q`
    Questionable,
    /// `e`
    Explicit,
    /// Any code the upstream sends that we don't recognize.
    #[default]
    Unclassified,
}

impl Rating {
    /// Maps an upstream rating code.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "g" | "s" | "general" | "safe" | "sensitive" => Rating::Safe,
            "q" | "questionable" => Rating::Questionable,
            "e" | "explicit" => Rating::Explicit,
            _ => Rating::Unclassified,
        }
    }
}

/// Moderation status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFlags {
    pub pending: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub banned: bool,
}

/// Human-oriented fields derived from an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayView {
    /// Artists joined as a readable list, underscores shown as spaces.
    pub artists: String,
    pub characters: String,
    pub copyrights: String,
    /// File size in binary units.
    pub size: String,
    /// Canonical URL of the post page.
    pub post_url: String,
    /// Search URL for the first artist, if any.
    pub artist_url: Option<String>,
}

/// A parsed upstream post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub rating: Rating,
    pub artists: Vec<String>,
    pub characters: Vec<String>,
    pub tags: Vec<String>,
    pub copyrights: Vec<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_url: Option<String>,
    pub preview_url: Option<String>,
    /// Lower-cased file extension without the dot.
    pub file_ext: String,
    pub file_size: u64,
    pub flags: ItemFlags,
    pub display: DisplayView,
}

/// Raw fields of an item, before the display view is derived.
#[derive(Debug, Clone, Default)]
pub struct ItemFields {
    pub id: u64,
    pub rating: Rating,
    pub artists: Vec<String>,
    pub characters: Vec<String>,
    pub tags: Vec<String>,
    pub copyrights: Vec<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_url: Option<String>,
    pub preview_url: Option<String>,
    pub file_ext: String,
    pub file_size: u64,
    pub flags: ItemFlags,
}

impl Item {
    /// Builds an item and its display view.
    ///
    /// `base_url` is the upstream site root used for canonical URLs.
    pub fn from_fields(fields: ItemFields, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let display = DisplayView {
            artists: humanized(&fields.artists),
            characters: humanized(&fields.characters),
            copyrights: humanized(&fields.copyrights),
            size: format_size(fields.file_size),
            post_url: format!("{}/posts/{}", base, fields.id),
            artist_url: fields
                .artists
                .first()
                .and_then(|artist| artist_search_url(base, artist)),
        };

        Item {
            id: ItemId(fields.id),
            rating: fields.rating,
            artists: fields.artists,
            characters: fields.characters,
            tags: fields.tags,
            copyrights: fields.copyrights,
            width: fields.width,
            height: fields.height,
            file_url: fields.file_url,
            preview_url: fields.preview_url,
            file_ext: fields.file_ext.to_ascii_lowercase(),
            file_size: fields.file_size,
            flags: fields.flags,
            display,
        }
    }
}

/// `<base>/posts?tags=<artist>` with the tag form-encoded. `None` if `base` is
/// not a valid URL.
fn artist_search_url(base: &str, artist: &str) -> Option<String> {
    Url::parse_with_params(&format!("{base}/posts"), [("tags", artist)])
        .ok()
        .map(String::from)
}

fn humanized(tags: &[String]) -> String {
    let names: Vec<String> = tags.iter().map(|t| humanize_tag(t)).collect();
    readable_list(&names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_codes() {
        assert_eq!(Rating::from_code("s"), Rating::Safe);
        assert_eq!(Rating::from_code("g"), Rating::Safe);
        assert_eq!(Rating::from_code("Q"), Rating::Questionable);
        assert_eq!(Rating::from_code("e"), Rating::Explicit);
        assert_eq!(Rating::from_code("x"), Rating::Unclassified);
    }

    #[test]
    fn display_view_is_derived_once() {
        let item = Item::from_fields(
            ItemFields {
                id: 7,
                artists: vec!["some_artist".into(), "other".into()],
                characters: vec!["hatsune_miku".into()],
                copyrights: vec!["vocaloid".into()],
                file_ext: "PNG".into(),
                file_size: 2048,
                ..ItemFields::default()
            },
            "https://example.org/",
        );

        assert_eq!(item.file_ext, "png");
        assert_eq!(item.display.artists, "some artist and other");
        assert_eq!(item.display.characters, "hatsune miku");
        assert_eq!(item.display.size, "2.0 KiB");
        assert_eq!(item.display.post_url, "https://example.org/posts/7");
        assert_eq!(
            item.display.artist_url.as_deref(),
            Some("https://example.org/posts?tags=some_artist")
        );
    }

    #[test]
    fn artist_url_encodes_reserved_characters() {
        let item = Item::from_fields(
            ItemFields {
                artists: vec!["a&b#c+d%".into()],
                ..ItemFields::default()
            },
            "https://booru.example",
        );

        let url = Url::parse(item.display.artist_url.as_deref().unwrap()).unwrap();
        assert_eq!(url.path(), "/posts");
        assert!(url.fragment().is_none());
        let tags: Vec<_> = url.query_pairs().collect();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].0, "tags");
        assert_eq!(tags[0].1, "a&b#c+d%");
    }

    #[test]
    fn no_artist_means_no_artist_url() {
        let item = Item::from_fields(ItemFields::default(), "https://example.org");
        assert!(item.display.artist_url.is_none());
        assert_eq!(item.display.artists, "");
    }
}
