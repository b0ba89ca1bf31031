//! Upstream post parser.
//!
//! Maps the JSON records returned by the posts endpoint into typed [`Item`]s.
//! Unknown fields are ignored. The required fields are `id`, `rating`, the four
//! `tag_string_*` fields, `file_ext` and `file_size`; a record missing any of
//! them is rejected with [`ParseError::MissingField`].
//!
//! # Record shape
//!
//! ```json
//! {
//!   "id": 101,
//!   "rating": "s",
//!   "tag_string_artist": "some_artist",
//!   "tag_string_character": "hatsune_miku",
//!   "tag_string_general": "1girl solo",
//!   "tag_string_copyright": "vocaloid",
//!   "image_width": 800, "image_height": 600,
//!   "file_url": "https://cdn.example/a.png",
//!   "large_file_url": "https://cdn.example/sample/a.jpg",
//!   "preview_file_url": "https://cdn.example/preview/a.jpg",
//!   "file_ext": "png",
//!   "file_size": 123456,
//!   "is_pending": false, "is_flagged": false, "is_deleted": false, "is_banned": false
//! }
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Item, ItemFields, ItemFlags, Rating};

/// Error for a single malformed record.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The record is not a JSON object of the expected shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent or null.
    #[error("record {id} is missing required field {field}")]
    MissingField { id: String, field: &'static str },
}

/// Raw record as sent by the upstream.
///
/// Every field is optional here so that missing required fields surface as a
/// [`ParseError::MissingField`] naming the field, rather than a serde message.
#[derive(Debug, Deserialize)]
struct RawPost {
    id: Option<u64>,
    rating: Option<String>,
    tag_string_artist: Option<String>,
    tag_string_character: Option<String>,
    tag_string_general: Option<String>,
    tag_string_copyright: Option<String>,
    image_width: Option<u32>,
    image_height: Option<u32>,
    file_url: Option<String>,
    preview_file_url: Option<String>,
    file_ext: Option<String>,
    file_size: Option<u64>,
    #[serde(default)]
    is_pending: bool,
    #[serde(default)]
    is_flagged: bool,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    is_banned: bool,
}

/// Parses one upstream record.
///
/// `base_url` is the upstream site root, used for the item's canonical URLs.
pub fn parse_item(value: serde_json::Value, base_url: &str) -> Result<Item, ParseError> {
    let raw: RawPost = serde_json::from_value(value)?;
    let id_label = raw
        .id
        .map_or_else(|| "<unknown>".to_string(), |id| id.to_string());
    let missing = |field: &'static str| ParseError::MissingField {
        id: id_label.clone(),
        field,
    };

    let id = raw.id.ok_or_else(|| missing("id"))?;
    let rating = raw.rating.ok_or_else(|| missing("rating"))?;
    let artists = raw.tag_string_artist.ok_or_else(|| missing("tag_string_artist"))?;
    let characters = raw
        .tag_string_character
        .ok_or_else(|| missing("tag_string_character"))?;
    let general = raw
        .tag_string_general
        .ok_or_else(|| missing("tag_string_general"))?;
    let copyrights = raw
        .tag_string_copyright
        .ok_or_else(|| missing("tag_string_copyright"))?;
    let file_ext = raw.file_ext.ok_or_else(|| missing("file_ext"))?;
    let file_size = raw.file_size.ok_or_else(|| missing("file_size"))?;

    let fields = ItemFields {
        id,
        rating: Rating::from_code(&rating),
        artists: split_tags(&artists),
        characters: split_tags(&characters),
        tags: split_tags(&general),
        copyrights: split_tags(&copyrights),
        width: raw.image_width,
        height: raw.image_height,
        file_url: raw.file_url.filter(|u| !u.is_empty()),
        // large_file_url is the video itself for video posts, so only the
        // thumbnail is usable as a preview.
        preview_url: raw.preview_file_url.filter(|u| !u.is_empty()),
        file_ext,
        file_size,
        flags: ItemFlags {
            pending: raw.is_pending,
            flagged: raw.is_flagged,
            deleted: raw.is_deleted,
            banned: raw.is_banned,
        },
    };

    Ok(Item::from_fields(fields, base_url))
}

/// A parsed response: the records that mapped cleanly plus the rejects.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    pub items: Vec<Item>,
    pub rejected: Vec<ParseError>,
}

/// Parses a whole posts response.
///
/// The body must be a JSON array; anything else fails the batch. Individual
/// malformed records are collected in [`FetchedBatch::rejected`] and do not
/// fail the others.
pub fn parse_items(body: &[u8], base_url: &str) -> Result<FetchedBatch, serde_json::Error> {
    let records: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    let mut batch = FetchedBatch::default();
    for record in records {
        match parse_item(record, base_url) {
            Ok(item) => batch.items.push(item),
            Err(e) => batch.rejected.push(e),
        }
    }
    Ok(batch)
}

fn split_tags(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemId;
    use serde_json::json;

    const BASE: &str = "https://booru.example";

    fn full_record() -> serde_json::Value {
        json!({
            "id": 101,
            "rating": "q",
            "tag_string_artist": "some_artist",
            "tag_string_character": "hatsune_miku kagamine_rin",
            "tag_string_general": "1girl solo smile",
            "tag_string_copyright": "vocaloid",
            "image_width": 800,
            "image_height": 600,
            "file_url": "https://cdn.example/a.png",
            "preview_file_url": "https://cdn.example/p/a.jpg",
            "file_ext": "png",
            "file_size": 1536,
            "is_pending": true,
            "unknown_field": "ignored"
        })
    }

    #[test]
    fn parses_full_record() {
        let item = parse_item(full_record(), BASE).unwrap();

        assert_eq!(item.id, ItemId(101));
        assert_eq!(item.rating, Rating::Questionable);
        assert_eq!(item.characters, vec!["hatsune_miku", "kagamine_rin"]);
        assert_eq!(item.tags.len(), 3);
        assert_eq!(item.width, Some(800));
        assert_eq!(item.preview_url.as_deref(), Some("https://cdn.example/p/a.jpg"));
        assert!(item.flags.pending);
        assert!(!item.flags.deleted);
        assert_eq!(item.display.characters, "hatsune miku and kagamine rin");
        assert_eq!(item.display.post_url, "https://booru.example/posts/101");
        assert_eq!(item.display.size, "1.5 KiB");
    }

    #[test]
    fn large_file_url_is_not_used_as_preview() {
        let mut record = full_record();
        record["file_ext"] = json!("mp4");
        record["large_file_url"] = json!("https://cdn.example/a.mp4");

        let item = parse_item(record, BASE).unwrap();

        assert_eq!(item.preview_url.as_deref(), Some("https://cdn.example/p/a.jpg"));
    }

    #[test]
    fn empty_urls_are_treated_as_absent() {
        let mut record = full_record();
        record["file_url"] = json!("");

        assert!(parse_item(record, BASE).unwrap().file_url.is_none());
    }

    #[test]
    fn empty_tag_strings_are_allowed() {
        let mut record = full_record();
        record["tag_string_artist"] = json!("");

        let item = parse_item(record, BASE).unwrap();

        assert!(item.artists.is_empty());
        assert!(item.display.artist_url.is_none());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let record = json!({
            "id": 5,
            "rating": "s",
            "tag_string_artist": "",
            "tag_string_character": "",
            "tag_string_general": "",
            "tag_string_copyright": "",
            "file_ext": "zip",
            "file_size": 10
        });

        let item = parse_item(record, BASE).unwrap();

        assert!(item.file_url.is_none());
        assert!(item.width.is_none());
        assert_eq!(item.flags, ItemFlags::default());
    }

    #[test]
    fn each_required_field_is_enforced() {
        for field in [
            "id",
            "rating",
            "tag_string_artist",
            "tag_string_character",
            "tag_string_general",
            "tag_string_copyright",
            "file_ext",
            "file_size",
        ] {
            let mut record = full_record();
            record.as_object_mut().unwrap().remove(field);

            match parse_item(record, BASE) {
                Err(ParseError::MissingField { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected MissingField({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn null_required_field_is_missing() {
        let mut record = full_record();
        record["file_size"] = serde_json::Value::Null;

        assert!(matches!(
            parse_item(record, BASE),
            Err(ParseError::MissingField {
                field: "file_size",
                ..
            })
        ));
    }

    #[test]
    fn batch_keeps_good_records_and_collects_rejects() {
        let mut broken = full_record();
        broken.as_object_mut().unwrap().remove("file_ext");
        let mut second = full_record();
        second["id"] = json!(102);
        let body = serde_json::to_vec(&json!([full_record(), broken, second])).unwrap();

        let batch = parse_items(&body, BASE).unwrap();

        let ids: Vec<u64> = batch.items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![101, 102]);
        assert_eq!(batch.rejected.len(), 1);
    }

    #[test]
    fn non_array_body_fails_the_batch() {
        assert!(parse_items(br#"{"success": false}"#, BASE).is_err());
        assert!(parse_items(b"<html>", BASE).is_err());
        assert!(parse_items(b"[]", BASE).unwrap().items.is_empty());
    }

    #[test]
    fn wrong_type_is_json_error() {
        let mut record = full_record();
        record["id"] = json!("not-a-number");

        assert!(matches!(parse_item(record, BASE), Err(ParseError::Json(_))));
    }
}
