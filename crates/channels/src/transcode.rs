//! Capability-aware content downgrade.
//!
//! A pure, total function over (content, capabilities): either the target
//! renders the variant natively, or the content is downgraded to its text
//! rendition, or the target is skipped ([`TranscodeError::NotTranscodable`]).

use switchboard_types::{Capabilities, Content, ContentKind, OverflowPolicy};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("content kind {kind:?} cannot be rendered with the target capabilities")]
    NotTranscodable { kind: ContentKind },
}

/// Produce a content value the target capabilities can render.
///
/// Natively supported kinds pass unchanged (composites only when every part
/// is also supported). Everything else falls back to a text rendition when
/// the target supports text; composites flatten recursively with newline
/// separators, leaving no nested composites.
pub fn transcode(content: &Content, caps: &Capabilities) -> Result<Content, TranscodeError> {
    if caps.supports(content.kind()) {
        match content {
            Content::Composite { parts } => {
                if parts.iter().all(|part| caps.supports(part.kind())) {
                    return Ok(content.clone());
                }
            },
            _ => return Ok(content.clone()),
        }
    }
    if !caps.supports(ContentKind::Text) {
        return Err(TranscodeError::NotTranscodable {
            kind: content.kind(),
        });
    }
    Ok(Content::Text {
        text: text_rendition(content)?,
    })
}

/// Text form of any content variant. System content has no generic text
/// rendition and fails.
fn text_rendition(content: &Content) -> Result<String, TranscodeError> {
    match content {
        Content::Text { text } => Ok(text.clone()),
        Content::Rich { fallback, .. } => Ok(fallback.clone()),
        Content::Media { url, caption, .. } => Ok(match caption {
            Some(caption) => format!("{caption} {url}"),
            None => url.clone(),
        }),
        Content::Location { lat, lon, label } => Ok(match label {
            Some(label) => format!("[Location: {label} ({lat}, {lon})]"),
            None => format!("[Location: ({lat}, {lon})]"),
        }),
        Content::Audio { transcript, .. } => Ok(transcript
            .clone()
            .unwrap_or_else(|| "[Voice message]".to_string())),
        Content::Video { url, .. } => Ok(format!("[Video: {url}]")),
        Content::Composite { parts } => {
            let rendered: Result<Vec<String>, TranscodeError> =
                parts.iter().map(text_rendition).collect();
            Ok(rendered?.join("\n"))
        },
        Content::System { .. } => Err(TranscodeError::NotTranscodable {
            kind: ContentKind::System,
        }),
        Content::Template { body, .. } => Ok(body.clone()),
    }
}

/// Apply a binding's `max_length` policy. Returns `None` when the content
/// must be rejected for this target.
pub fn enforce_max_length(content: Content, caps: &Capabilities) -> Option<Content> {
    let Some(max) = caps.max_length else {
        return Some(content);
    };
    if content.display_len() <= max {
        return Some(content);
    }
    match caps.overflow {
        OverflowPolicy::Reject => None,
        OverflowPolicy::Truncate => match content {
            Content::Text { text } => Some(Content::Text {
                text: text.chars().take(max).collect(),
            }),
            // Structured payloads cannot be shortened meaningfully.
            _ => None,
        },
    }
}
