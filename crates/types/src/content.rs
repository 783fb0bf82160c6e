//! Event content: a tagged union of everything a message can carry.
//!
//! Each variant holds enough to losslessly render on a channel that
//! advertises the matching capability; the transcoder in
//! `switchboard-channels` downgrades variants for targets that do not.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Maximum nesting depth of composite content, counting the outermost
/// composite as depth 1.
pub const MAX_COMPOSITE_DEPTH: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("composite content exceeds the maximum nesting depth of {MAX_COMPOSITE_DEPTH}")]
    TooDeep,
    #[error("composite content requires at least one part")]
    Empty,
}

/// Discriminant of a [`Content`] variant, used in capability declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Rich,
    Media,
    Location,
    Audio,
    Video,
    Composite,
    System,
    Template,
}

/// An inline button attached to rich content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub value: String,
}

/// A card inside rich content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

/// The content payload of a room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    Rich {
        html: String,
        /// Plain-text rendition used when the target cannot render HTML.
        fallback: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buttons: Vec<Button>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cards: Vec<Card>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<String>,
    },
    Media {
        url: String,
        mime_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Location {
        lat: f64,
        lon: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Audio {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    Video {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
    },
    Composite {
        parts: Vec<Content>,
    },
    System {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Template {
        id: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        params: Map<String, Value>,
        /// Rendered body text used on targets without template support.
        body: String,
    },
}

impl Content {
    /// Plain text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Rich content with a plain-text fallback.
    pub fn rich(html: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self::Rich {
            html: html.into(),
            fallback: fallback.into(),
            buttons: Vec::new(),
            cards: Vec::new(),
            quick_replies: Vec::new(),
        }
    }

    /// Media content by URL.
    pub fn media(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Media {
            url: url.into(),
            mime_type: mime_type.into(),
            caption: None,
        }
    }

    /// Composite content. Rejects empty part lists and trees deeper than
    /// [`MAX_COMPOSITE_DEPTH`].
    pub fn composite(parts: Vec<Content>) -> Result<Self, ContentError> {
        if parts.is_empty() {
            return Err(ContentError::Empty);
        }
        let content = Self::Composite { parts };
        if content.depth() > MAX_COMPOSITE_DEPTH {
            return Err(ContentError::TooDeep);
        }
        Ok(content)
    }

    /// System content with a machine-readable code.
    pub fn system(code: impl Into<String>, data: Option<Value>) -> Self {
        Self::System {
            code: code.into(),
            data,
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text { .. } => ContentKind::Text,
            Self::Rich { .. } => ContentKind::Rich,
            Self::Media { .. } => ContentKind::Media,
            Self::Location { .. } => ContentKind::Location,
            Self::Audio { .. } => ContentKind::Audio,
            Self::Video { .. } => ContentKind::Video,
            Self::Composite { .. } => ContentKind::Composite,
            Self::System { .. } => ContentKind::System,
            Self::Template { .. } => ContentKind::Template,
        }
    }

    /// Nesting depth: 1 for leaf variants, 1 + max part depth for composites.
    pub fn depth(&self) -> usize {
        match self {
            Self::Composite { parts } => {
                1 + parts.iter().map(Content::depth).max().unwrap_or(0)
            },
            _ => 1,
        }
    }

    /// Character count relevant for `max_length` enforcement.
    ///
    /// Only textual payloads count; media and structured variants are
    /// treated as zero-length (their size limits live at the adapter).
    pub fn display_len(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::Rich { fallback, .. } => fallback.chars().count(),
            Self::Template { body, .. } => body.chars().count(),
            Self::Composite { parts } => parts.iter().map(Content::display_len).sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(depth: usize) -> Content {
        let mut content = Content::text("leaf");
        for _ in 0..depth {
            content = Content::Composite {
                parts: vec![content],
            };
        }
        content
    }

    #[test]
    fn text_serializes_with_kind_tag() {
        let json = serde_json::to_value(Content::text("hi")).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn rich_omits_empty_collections() {
        let json = serde_json::to_value(Content::rich("<b>Hi</b>", "Hi")).unwrap();
        assert_eq!(json["kind"], "rich");
        assert_eq!(json["fallback"], "Hi");
        assert!(json.get("buttons").is_none());
        assert!(json.get("cards").is_none());
    }

    #[test]
    fn content_roundtrips_through_json() {
        let original = Content::Composite {
            parts: vec![
                Content::text("a"),
                Content::Location {
                    lat: 48.85,
                    lon: 2.35,
                    label: Some("Paris".into()),
                },
            ],
        };
        let json = serde_json::to_string(&original).unwrap();
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn composite_constructor_rejects_empty() {
        assert!(matches!(
            Content::composite(vec![]),
            Err(ContentError::Empty)
        ));
    }

    #[test]
    fn composite_constructor_enforces_depth() {
        // depth(): a composite wrapping a leaf is depth 2, so four wrappers
        // around a leaf hit the limit of 5 and five exceed it.
        assert!(Content::composite(vec![nested(3)]).is_ok());
        assert!(matches!(
            Content::composite(vec![nested(4)]),
            Err(ContentError::TooDeep)
        ));
    }

    #[test]
    fn depth_of_leaf_is_one() {
        assert_eq!(Content::text("x").depth(), 1);
        assert_eq!(nested(2).depth(), 3);
    }

    #[test]
    fn display_len_counts_chars_not_bytes() {
        assert_eq!(Content::text("héllo").display_len(), 5);
        assert_eq!(Content::media("https://x/y.png", "image/png").display_len(), 0);
    }
}
