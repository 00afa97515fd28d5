//! Transport message content and its classification.
//!
//! The transport layer hands us one [`MessageContent`] per event. Before
//! anything touches the database it is run through [`classify`], which is the
//! single place that decides whether an event becomes a message row, a
//! reaction, an edit, or nothing at all.

use serde::{Deserialize, Serialize};

use crate::models::{MediaAttachment, MediaKind};

/// Reply/forward metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextInfo {
    /// Identifier of the message being replied to.
    pub stanza_id: Option<String>,
    pub is_forwarded: bool,
    pub mentioned_jids: Vec<String>,
}

/// Media fields shared by image, video, audio, document and sticker content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaPayload {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub mimetype: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub context: Option<ContextInfo>,
}

/// Content of a transport message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
        #[serde(default)]
        context: Option<ContextInfo>,
    },
    Image(MediaPayload),
    Video(MediaPayload),
    Audio(MediaPayload),
    Document(MediaPayload),
    Sticker(MediaPayload),
    /// Reaction to another message. Empty `text` retracts.
    Reaction {
        target_id: String,
        #[serde(default)]
        text: String,
    },
    /// Protocol-level edit wrapper.
    Edit {
        target_id: String,
        #[serde(default)]
        edited: Option<Box<MessageContent>>,
    },
    #[serde(other)]
    Unknown,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text {
            text: text.into(),
            context: None,
        }
    }

    fn context(&self) -> Option<&ContextInfo> {
        match self {
            MessageContent::Text { context, .. } => context.as_ref(),
            MessageContent::Image(media)
            | MessageContent::Video(media)
            | MessageContent::Audio(media)
            | MessageContent::Document(media)
            | MessageContent::Sticker(media) => media.context.as_ref(),
            MessageContent::Reaction { .. } | MessageContent::Edit { .. } | MessageContent::Unknown => {
                None
            }
        }
    }
}

/// The persisted variants of a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MessageKind {
    /// Placeholder shown in chat lists when a message has no text.
    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Text => "message",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
        }
    }

    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image => Some(MediaKind::Image),
            MessageKind::Video => Some(MediaKind::Video),
            MessageKind::Audio => Some(MediaKind::Audio),
            MessageKind::Document => Some(MediaKind::Document),
            MessageKind::Sticker => Some(MediaKind::Sticker),
        }
    }
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MessageKind::Image,
            MediaKind::Video => MessageKind::Video,
            MediaKind::Audio => MessageKind::Audio,
            MediaKind::Document => MessageKind::Document,
            MediaKind::Sticker => MessageKind::Sticker,
        }
    }
}

/// A message-row-producing event after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedMessage {
    pub kind: MessageKind,
    pub text: String,
    pub reply_to_message_id: Option<String>,
    pub forwarded: bool,
    /// Identities mentioned in the body, in order.
    pub mentions: Vec<String>,
    pub media: Option<MediaAttachment>,
}

/// Outcome of classifying transport content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Message(ClassifiedMessage),
    Reaction { target_id: String, emoji: String },
    Edit {
        target_id: String,
        content: MessageContent,
    },
    Unsupported(&'static str),
}

/// Classify content. `rendered` is pre-rendered markup for the body and takes
/// precedence over the raw text or caption when non-empty.
pub fn classify(content: &MessageContent, rendered: Option<&str>) -> Classified {
    let (kind, raw_text, media) = match content {
        MessageContent::Text { text, .. } => (MessageKind::Text, Some(text.as_str()), None),
        MessageContent::Image(media) => (MessageKind::Image, media.caption.as_deref(), Some(media)),
        MessageContent::Video(media) => (MessageKind::Video, media.caption.as_deref(), Some(media)),
        MessageContent::Audio(media) => (MessageKind::Audio, None, Some(media)),
        MessageContent::Document(media) => {
            (MessageKind::Document, media.caption.as_deref(), Some(media))
        }
        MessageContent::Sticker(media) => (MessageKind::Sticker, None, Some(media)),
        MessageContent::Reaction { target_id, text } => {
            if target_id.is_empty() {
                return Classified::Unsupported("reaction without target");
            }
            return Classified::Reaction {
                target_id: target_id.clone(),
                emoji: text.clone(),
            };
        }
        MessageContent::Edit { target_id, edited } => {
            return match edited {
                Some(inner) if !target_id.is_empty() => Classified::Edit {
                    target_id: target_id.clone(),
                    content: (**inner).clone(),
                },
                _ => Classified::Unsupported("edit without target or content"),
            };
        }
        MessageContent::Unknown => return Classified::Unsupported("unknown content"),
    };

    let text = match rendered.filter(|r| !r.is_empty()) {
        Some(rendered) => rendered.to_string(),
        None => raw_text.unwrap_or_default().to_string(),
    };

    let context = content.context();
    let reply_to_message_id = context
        .and_then(|ctx| ctx.stanza_id.clone())
        .filter(|id| !id.is_empty());
    let forwarded = context.is_some_and(|ctx| ctx.is_forwarded);
    let mentions = context
        .map(|ctx| ctx.mentioned_jids.clone())
        .unwrap_or_default();

    let media = media.zip(kind.media_kind()).map(|(payload, media_kind)| {
        MediaAttachment::from_payload(media_kind, payload)
    });

    Classified::Message(ClassifiedMessage {
        kind,
        text,
        reply_to_message_id,
        forwarded,
        mentions,
        media,
    })
}
