//! Read-side queries: paged history, single lookups, media locators.
//!
//! Lookups return `Ok(None)` when the row does not exist so callers can tell
//! "not stored" apart from a failing database and fall back to a live fetch.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::Result;
use crate::jid::Jid;
use crate::models::{DecodedMessage, ExtendedMessage, MediaAttachment, MediaKind};
use crate::store::MessageStore;

const SELECT_LATEST_MESSAGES_BY_CHAT: &str = r#"
SELECT m.message_id, m.chat_jid, m.sender_jid, m.push_name, m.timestamp, m.is_from_me, m.text,
       m.reply_to_message_id, m.mentions, m.edited, m.forwarded, mm.type AS media_type, mm.file_name
FROM (
    SELECT rowid AS row_order, message_id, chat_jid, sender_jid, push_name, timestamp,
           is_from_me, text, reply_to_message_id, mentions, edited, forwarded
    FROM messages
    WHERE chat_jid = ?
    ORDER BY timestamp DESC, rowid DESC
    LIMIT ?
) AS m
LEFT JOIN message_media AS mm ON mm.message_id = m.message_id
ORDER BY m.timestamp ASC, m.row_order ASC
"#;

const SELECT_MESSAGES_BY_CHAT_BEFORE_TIMESTAMP: &str = r#"
SELECT m.message_id, m.chat_jid, m.sender_jid, m.push_name, m.timestamp, m.is_from_me, m.text,
       m.reply_to_message_id, m.mentions, m.edited, m.forwarded, mm.type AS media_type, mm.file_name
FROM (
    SELECT rowid AS row_order, message_id, chat_jid, sender_jid, push_name, timestamp,
           is_from_me, text, reply_to_message_id, mentions, edited, forwarded
    FROM messages
    WHERE chat_jid = ? AND timestamp < ?
    ORDER BY timestamp DESC, rowid DESC
    LIMIT ?
) AS m
LEFT JOIN message_media AS mm ON mm.message_id = m.message_id
ORDER BY m.timestamp ASC, m.row_order ASC
"#;

const SELECT_DECODED_MESSAGE_BY_CHAT_AND_ID: &str = r#"
SELECT m.message_id, m.chat_jid, m.sender_jid, m.push_name, m.timestamp, m.is_from_me, m.text,
       m.reply_to_message_id, m.mentions, m.edited, m.forwarded, mm.type AS media_type, mm.file_name
FROM messages AS m
LEFT JOIN message_media AS mm ON mm.message_id = m.message_id
WHERE m.chat_jid = ? AND m.message_id = ?
LIMIT 1
"#;

const SELECT_MESSAGE_BY_ID: &str = r#"
SELECT m.message_id, m.chat_jid, m.sender_jid, m.push_name, m.timestamp, m.is_from_me, m.text,
       m.reply_to_message_id, m.mentions, m.edited, m.forwarded, mm.type AS media_type, mm.file_name
FROM messages AS m
LEFT JOIN message_media AS mm ON mm.message_id = m.message_id
WHERE m.message_id = ?
LIMIT 1
"#;

const SELECT_MESSAGE_MEDIA_BY_MESSAGE_ID: &str = r#"
SELECT type, url, mimetype, direct_path, media_key, file_sha256, file_enc_sha256, width, height, file_name
FROM message_media
WHERE message_id = ?
"#;

/// Decode a joined message row. Rows with unparsable identities are skipped.
pub(crate) fn decoded_from_row(row: &SqliteRow) -> Option<DecodedMessage> {
    let chat = row.try_get::<&str, _>("chat_jid").ok()?.parse::<Jid>().ok()?;
    let sender = row
        .try_get::<&str, _>("sender_jid")
        .ok()?
        .parse::<Jid>()
        .ok()?;

    Some(DecodedMessage {
        id: row.try_get("message_id").ok()?,
        chat,
        sender,
        push_name: row.try_get("push_name").ok()?,
        timestamp: timestamp_from_secs(row.try_get("timestamp").ok()?),
        is_from_me: row.try_get("is_from_me").ok()?,
        text: row
            .try_get::<Option<String>, _>("text")
            .ok()?
            .unwrap_or_default(),
        reply_to_message_id: row
            .try_get::<Option<String>, _>("reply_to_message_id")
            .ok()?
            .filter(|id| !id.is_empty()),
        mentions: row
            .try_get::<Option<String>, _>("mentions")
            .ok()?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        edited: row.try_get("edited").ok()?,
        forwarded: row.try_get("forwarded").ok()?,
        media_type: row
            .try_get::<Option<i64>, _>("media_type")
            .ok()?
            .and_then(MediaKind::from_i64),
        file_name: row.try_get("file_name").ok()?,
    })
}

fn media_from_row(row: &SqliteRow) -> Option<MediaAttachment> {
    let kind = MediaKind::from_i64(row.try_get("type").ok()?)?;
    let dimension = |column: &str| {
        row.try_get::<Option<i64>, _>(column)
            .ok()
            .flatten()
            .and_then(|value| u32::try_from(value).ok())
    };
    let blob = |column: &str| {
        row.try_get::<Option<Vec<u8>>, _>(column)
            .ok()
            .flatten()
            .unwrap_or_default()
    };

    Some(MediaAttachment {
        kind,
        url: row.try_get("url").ok()?,
        direct_path: row.try_get("direct_path").ok()?,
        media_key: blob("media_key"),
        file_sha256: blob("file_sha256"),
        file_enc_sha256: blob("file_enc_sha256"),
        mimetype: row.try_get("mimetype").ok()?,
        width: dimension("width"),
        height: dimension("height"),
        file_name: row.try_get("file_name").ok()?,
    })
}

fn timestamp_from_secs(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

impl MessageStore {
    /// A page of a chat's history.
    ///
    /// `before_timestamp == 0` returns the latest `limit` messages; otherwise
    /// only messages strictly older than `before_timestamp` (Unix seconds).
    /// The page itself is ordered oldest first.
    pub async fn get_decoded_messages_paged(
        &self,
        chat: &Jid,
        before_timestamp: i64,
        limit: i64,
    ) -> Result<Vec<DecodedMessage>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = if before_timestamp == 0 {
            sqlx::query(SELECT_LATEST_MESSAGES_BY_CHAT)
                .bind(chat.to_string())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
        } else {
            sqlx::query(SELECT_MESSAGES_BY_CHAT_BEFORE_TIMESTAMP)
                .bind(chat.to_string())
                .bind(before_timestamp)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
        };

        Ok(rows.iter().filter_map(decoded_from_row).collect())
    }

    /// A single message within a chat.
    pub async fn get_decoded_message(
        &self,
        chat: &Jid,
        message_id: &str,
    ) -> Result<Option<DecodedMessage>> {
        let row = sqlx::query(SELECT_DECODED_MESSAGE_BY_CHAT_AND_ID)
            .bind(chat.to_string())
            .bind(message_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().and_then(decoded_from_row))
    }

    /// A message looked up by id alone, with its full media row. Used to
    /// build quoted replies whose chat is not known up front.
    pub async fn get_message_by_id(&self, message_id: &str) -> Result<Option<ExtendedMessage>> {
        let row = sqlx::query(SELECT_MESSAGE_BY_ID)
            .bind(message_id)
            .fetch_optional(self.db.pool())
            .await?;

        let Some(message) = row.as_ref().and_then(decoded_from_row) else {
            return Ok(None);
        };

        let media = if message.media_type.is_some() {
            self.get_message_media(message_id).await?
        } else {
            None
        };

        Ok(Some(ExtendedMessage { message, media }))
    }

    /// The locator needed to re-request a message's media from the transport.
    pub async fn get_message_media(&self, message_id: &str) -> Result<Option<MediaAttachment>> {
        let row = sqlx::query(SELECT_MESSAGE_MEDIA_BY_MESSAGE_ID)
            .bind(message_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().and_then(media_from_row))
    }

    /// Get message count.
    pub async fn count_messages(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.0)
    }

    /// Get the number of distinct chats.
    pub async fn count_chats(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT chat_jid) FROM messages")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.0)
    }
}
