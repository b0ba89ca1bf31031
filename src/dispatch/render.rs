//! Notification rendering.
//!
//! An item is rendered once into a [`WebhookPayload`] and the same payload is
//! posted to every destination of the feed. The wire shape is the common
//! chat-webhook embed format:
//!
//! ```json
//! {
//!   "username": "tagrelay",
//!   "embeds": [{
//!     "title": "hatsune miku (vocaloid)",
//!     "url": "https://booru.example/posts/101",
//!     "color": 3066993,
//!     "author": { "name": "some artist", "url": "https://booru.example/posts?tags=some_artist" },
//!     "image": { "url": "https://cdn.example/a.png" },
//!     "footer": { "text": "800×600 · 1.5 KiB · png" }
//!   }]
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::text::truncate;
use crate::types::{DisplayIdentity, Item, Rating};

/// Hard limit for the title and author name, ellipsis included.
pub const MAX_FIELD_CHARS: usize = 96;

/// Author name used when an item has no artist tags.
pub const UNKNOWN_ARTIST: &str = "Unknown artist";

/// Embed colour per rating, as a 24-bit RGB integer.
pub mod colors {
    pub const SAFE: u32 = 0x2E_CC_71;
    pub const QUESTIONABLE: u32 = 0xF1_C4_0F;
    pub const EXPLICIT: u32 = 0xE7_4C_3C;
    pub const UNCLASSIFIED: u32 = 0x95_A5_A6;
}

/// The colour class for `rating`.
pub fn rating_color(rating: Rating) -> u32 {
    match rating {
        Rating::Safe => colors::SAFE,
        Rating::Questionable => colors::QUESTIONABLE,
        Rating::Explicit => colors::EXPLICIT,
        Rating::Unclassified => colors::UNCLASSIFIED,
    }
}

/// How a file extension is presented in a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Embedded directly from the full file URL.
    Image,
    /// Shown through its preview thumbnail.
    Video,
    /// Not embeddable.
    Archive,
    Unknown,
}

impl FileKind {
    /// Classifies a lower-cased extension without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "bmp" => FileKind::Image,
            "mp4" | "webm" | "mov" | "m4v" | "mkv" => FileKind::Video,
            "zip" | "rar" | "7z" | "swf" => FileKind::Archive,
            _ => FileKind::Unknown,
        }
    }
}

/// The URL to embed as the notification image, if any.
pub fn attachment_url(item: &Item) -> Option<&str> {
    match FileKind::from_extension(&item.file_ext) {
        FileKind::Image => item.file_url.as_deref(),
        FileKind::Video => item.preview_url.as_deref(),
        kind @ (FileKind::Archive | FileKind::Unknown) => {
            debug!(item_id = %item.id, ext = %item.file_ext, ?kind, "No embeddable attachment");
            None
        }
    }
}

// ─── Wire types ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

// ─── Rendering ───

/// Renders `item` for a feed with the given display identity.
pub fn render_item(item: &Item, identity: Option<&DisplayIdentity>) -> WebhookPayload {
    let display = &item.display;

    let author = if display.artists.is_empty() {
        EmbedAuthor {
            name: UNKNOWN_ARTIST.to_string(),
            url: None,
        }
    } else {
        EmbedAuthor {
            name: truncate(&display.artists, MAX_FIELD_CHARS),
            url: display.artist_url.clone(),
        }
    };

    let embed = Embed {
        title: truncate(&title(item), MAX_FIELD_CHARS),
        url: display.post_url.clone(),
        color: rating_color(item.rating),
        author: Some(author),
        image: attachment_url(item).map(|url| EmbedImage {
            url: url.to_string(),
        }),
        footer: Some(EmbedFooter {
            text: footer(item),
        }),
    };

    WebhookPayload {
        username: identity.and_then(|i| i.username.clone()),
        avatar_url: identity.and_then(|i| i.avatar_url.clone()),
        embeds: vec![embed],
    }
}

fn title(item: &Item) -> String {
    let display = &item.display;
    match (display.characters.is_empty(), display.copyrights.is_empty()) {
        (false, false) => format!("{} ({})", display.characters, display.copyrights),
        (false, true) => display.characters.clone(),
        (true, false) => display.copyrights.clone(),
        (true, true) => format!("Post {}", item.id),
    }
}

fn footer(item: &Item) -> String {
    let mut parts = Vec::with_capacity(3);
    if let (Some(w), Some(h)) = (item.width, item.height) {
        parts.push(format!("{w}×{h}"));
    }
    parts.push(item.display.size.clone());
    parts.push(item.file_ext.clone());
    parts.join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{item, item_with};

    #[test]
    fn colors_follow_rating() {
        assert_eq!(rating_color(Rating::Safe), colors::SAFE);
        assert_eq!(rating_color(Rating::Explicit), colors::EXPLICIT);
        assert_eq!(rating_color(Rating::Unclassified), colors::UNCLASSIFIED);
    }

    #[test]
    fn extension_classification() {
        assert_eq!(FileKind::from_extension("webp"), FileKind::Image);
        assert_eq!(FileKind::from_extension("webm"), FileKind::Video);
        assert_eq!(FileKind::from_extension("swf"), FileKind::Archive);
        assert_eq!(FileKind::from_extension("psd"), FileKind::Unknown);
    }

    #[test]
    fn image_attaches_full_file() {
        let item = item_with(1, "png", Rating::Safe);
        assert_eq!(attachment_url(&item), item.file_url.as_deref());
    }

    #[test]
    fn video_attaches_preview() {
        let item = item_with(1, "mp4", Rating::Safe);
        assert_eq!(attachment_url(&item), item.preview_url.as_deref());
        assert_ne!(attachment_url(&item), item.file_url.as_deref());
    }

    #[test]
    fn archive_attaches_nothing() {
        let mut item = item_with(1, "zip", Rating::Safe);
        assert_eq!(attachment_url(&item), None);

        item.file_ext = "xyz".into();
        assert_eq!(attachment_url(&item), None);
    }

    #[test]
    fn render_uses_display_view_and_identity() {
        let item = item(101);
        let identity = DisplayIdentity {
            username: Some("relay".into()),
            avatar_url: None,
        };

        let payload = render_item(&item, Some(&identity));

        assert_eq!(payload.username.as_deref(), Some("relay"));
        assert!(payload.avatar_url.is_none());
        let embed = &payload.embeds[0];
        assert_eq!(embed.url, item.display.post_url);
        assert_eq!(
            embed.title,
            format!("{} ({})", item.display.characters, item.display.copyrights)
        );
        assert_eq!(embed.author.as_ref().unwrap().name, item.display.artists);
        assert!(embed.footer.as_ref().unwrap().text.ends_with(" · png"));
    }

    #[test]
    fn title_falls_back_to_post_id() {
        let mut item = item(7);
        item.display.characters.clear();
        item.display.copyrights.clear();
        item.display.artists.clear();

        let embed = render_item(&item, None).embeds.remove(0);

        assert_eq!(embed.title, "Post #7");
        assert_eq!(embed.author.unwrap().name, UNKNOWN_ARTIST);
    }

    #[test]
    fn long_fields_are_truncated_to_limit() {
        let mut item = item(1);
        item.display.characters = "c".repeat(300);
        item.display.artists = "a".repeat(300);

        let embed = render_item(&item, None).embeds.remove(0);

        assert_eq!(embed.title.chars().count(), MAX_FIELD_CHARS);
        assert!(embed.title.ends_with(crate::text::ELLIPSIS));
        assert_eq!(embed.author.unwrap().name.chars().count(), MAX_FIELD_CHARS);
    }

    #[test]
    fn footer_omits_unknown_dimensions() {
        let mut item = item(1);
        item.width = None;

        let payload = render_item(&item, None);

        let text = &payload.embeds[0].footer.as_ref().unwrap().text;
        assert_eq!(*text, format!("{} · png", item.display.size));
    }

    #[test]
    fn payload_omits_absent_optionals() {
        let mut item = item_with(1, "zip", Rating::Safe);
        item.display.artist_url = None;

        let json = serde_json::to_value(render_item(&item, None)).unwrap();

        assert!(json.get("username").is_none());
        assert!(json["embeds"][0].get("image").is_none());
        assert!(json["embeds"][0]["author"].get("url").is_none());
    }
}
