//! Domain models for stored messages, media, reactions and chat summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{MediaPayload, MessageContent, MessageKind};
use crate::jid::Jid;

/// Envelope metadata of a transport message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_from_me: bool,
    /// Display name the sender announced, if any.
    #[serde(default)]
    pub push_name: Option<String>,
}

/// A message-arrived/edited/reaction event from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub content: MessageContent,
}

/// Media attachment variants, stored as integers in `message_media.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_i64(self) -> i64 {
        match self {
            MediaKind::Image => 1,
            MediaKind::Video => 2,
            MediaKind::Audio => 3,
            MediaKind::Document => 4,
            MediaKind::Sticker => 5,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(MediaKind::Image),
            2 => Some(MediaKind::Video),
            3 => Some(MediaKind::Audio),
            4 => Some(MediaKind::Document),
            5 => Some(MediaKind::Sticker),
            _ => None,
        }
    }

    fn has_dimensions(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Sticker)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(MessageKind::from(*self).label())
    }
}

/// Remote locator for a message's media blob.
///
/// The byte fields are opaque; they are only ever handed back to the transport
/// to re-request the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub mimetype: Option<String>,
    /// Image and sticker only.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Document only.
    pub file_name: Option<String>,
}

impl MediaAttachment {
    pub fn from_payload(kind: MediaKind, payload: &MediaPayload) -> Self {
        let (width, height) = if kind.has_dimensions() {
            (payload.width, payload.height)
        } else {
            (None, None)
        };
        Self {
            kind,
            url: payload.url.clone(),
            direct_path: payload.direct_path.clone(),
            media_key: payload.media_key.clone(),
            file_sha256: payload.file_sha256.clone(),
            file_enc_sha256: payload.file_enc_sha256.clone(),
            mimetype: payload.mimetype.clone(),
            width,
            height,
            file_name: if kind == MediaKind::Document {
                payload.file_name.clone()
            } else {
                None
            },
        }
    }
}

/// Render-ready view of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub text: String,
    pub reply_to_message_id: Option<String>,
    /// Mentioned identities, in body order.
    pub mentions: Vec<String>,
    pub edited: bool,
    pub forwarded: bool,
    pub media_type: Option<MediaKind>,
    pub file_name: Option<String>,
}

impl DecodedMessage {
    pub fn kind(&self) -> MessageKind {
        self.media_type.map_or(MessageKind::Text, MessageKind::from)
    }
}

/// A stored message together with its full media row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedMessage {
    #[serde(flatten)]
    pub message: DecodedMessage,
    pub media: Option<MediaAttachment>,
}

/// Latest-message summary of a chat, used for chat list rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub jid: Jid,
    pub message_id: String,
    pub message_text: String,
    /// Unix seconds.
    pub message_time: i64,
    pub sender: String,
}

impl ChatSummary {
    pub fn from_message(message: &DecodedMessage) -> Self {
        Self {
            jid: message.chat.clone(),
            message_id: message.id.clone(),
            message_text: summary_text(&message.text, message.kind()),
            message_time: message.timestamp.timestamp(),
            sender: sender_label(
                message.is_from_me,
                message.push_name.as_deref(),
                &message.sender,
            ),
        }
    }
}

/// Text shown for a chat's latest message.
pub fn summary_text(text: &str, kind: MessageKind) -> String {
    if text.is_empty() {
        kind.label().to_string()
    } else {
        text.to_string()
    }
}

/// Display label for the sender of a chat's latest message.
pub fn sender_label(is_from_me: bool, push_name: Option<&str>, sender: &Jid) -> String {
    if is_from_me {
        return "You".to_string();
    }
    match push_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => sender.user.clone(),
    }
}

/// One emoji on a message and who reacted with it, in reaction order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub senders: Vec<String>,
}

/// Outcome of a bulk LID to PN migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Message rows examined.
    pub scanned: u64,
    /// Rows whose chat identity was rewritten.
    pub chats_migrated: u64,
    /// Rows whose sender identity was rewritten.
    pub senders_migrated: u64,
    /// Reaction rows moved to a canonical sender.
    pub reactions_migrated: u64,
    /// Row updates that failed and were skipped.
    pub failed: u64,
}

impl MigrationReport {
    pub fn changed(&self) -> bool {
        self.chats_migrated > 0 || self.senders_migrated > 0 || self.reactions_migrated > 0
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
