//! Message table manager: insert and edit of message rows and their media.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::chat_list::ChatListCache;
use crate::content::{Classified, ClassifiedMessage, MessageContent, MessageKind, classify};
use crate::error::Result;
use crate::jid::Jid;
use crate::models::{
    ChatSummary, MediaAttachment, MediaKind, MessageInfo, sender_label, summary_text,
};
use crate::store::MessageStore;
use crate::write_queue::WriteJob;

// Re-deliveries never clobber a row that has already been edited.
const UPSERT_MESSAGE: &str = r#"
INSERT INTO messages
    (message_id, chat_jid, sender_jid, push_name, timestamp, is_from_me, text, has_media,
     reply_to_message_id, mentions, edited, forwarded)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?)
ON CONFLICT(message_id) DO UPDATE SET
    chat_jid = excluded.chat_jid,
    sender_jid = excluded.sender_jid,
    push_name = COALESCE(excluded.push_name, messages.push_name),
    timestamp = excluded.timestamp,
    is_from_me = excluded.is_from_me,
    text = excluded.text,
    has_media = excluded.has_media,
    reply_to_message_id = excluded.reply_to_message_id,
    mentions = excluded.mentions,
    forwarded = excluded.forwarded
WHERE messages.edited = FALSE
"#;

const UPDATE_MESSAGE_CONTENT: &str = r#"
UPDATE messages
SET text = ?, edited = TRUE, has_media = (has_media OR ?)
WHERE message_id = ?
RETURNING chat_jid
"#;

const SELECT_MEDIA_TYPE: &str = "SELECT type FROM message_media WHERE message_id = ?";

const UPSERT_MESSAGE_MEDIA: &str = r#"
INSERT INTO message_media
    (message_id, type, url, mimetype, direct_path, media_key, file_sha256, file_enc_sha256,
     width, height, file_name)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(message_id) DO UPDATE SET
    type = excluded.type,
    url = excluded.url,
    mimetype = excluded.mimetype,
    direct_path = excluded.direct_path,
    media_key = excluded.media_key,
    file_sha256 = excluded.file_sha256,
    file_enc_sha256 = excluded.file_enc_sha256,
    width = excluded.width,
    height = excluded.height,
    file_name = excluded.file_name
"#;

async fn upsert_media(
    conn: &mut SqliteConnection,
    message_id: &str,
    media: &MediaAttachment,
) -> Result<()> {
    sqlx::query(UPSERT_MESSAGE_MEDIA)
        .bind(message_id)
        .bind(media.kind.as_i64())
        .bind(&media.url)
        .bind(&media.mimetype)
        .bind(&media.direct_path)
        .bind(&media.media_key)
        .bind(&media.file_sha256)
        .bind(&media.file_enc_sha256)
        .bind(media.width.map(i64::from))
        .bind(media.height.map(i64::from))
        .bind(&media.file_name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Insert (or re-deliver) a classified message.
pub(crate) struct InsertMessageJob {
    info: MessageInfo,
    message: ClassifiedMessage,
    chat_list: Arc<ChatListCache>,
}

impl InsertMessageJob {
    pub(crate) fn new(
        info: MessageInfo,
        message: ClassifiedMessage,
        chat_list: Arc<ChatListCache>,
    ) -> Self {
        Self {
            info,
            message,
            chat_list,
        }
    }

    fn summary(&self) -> ChatSummary {
        ChatSummary {
            jid: self.info.chat.clone(),
            message_id: self.info.id.clone(),
            message_text: summary_text(&self.message.text, self.message.kind),
            message_time: self.info.timestamp.timestamp(),
            sender: sender_label(
                self.info.is_from_me,
                self.info.push_name.as_deref(),
                &self.info.sender,
            ),
        }
    }
}

#[async_trait]
impl WriteJob for InsertMessageJob {
    /// Whether the row was written (false when an edited row was kept).
    type Output = bool;

    fn name(&self) -> &'static str {
        "insert_message"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<bool> {
        let info = &self.info;
        let message = &self.message;

        let result = sqlx::query(UPSERT_MESSAGE)
            .bind(&info.id)
            .bind(info.chat.to_string())
            .bind(info.sender.to_string())
            .bind(&info.push_name)
            .bind(info.timestamp.timestamp())
            .bind(info.is_from_me)
            .bind(&message.text)
            .bind(message.media.is_some())
            .bind(&message.reply_to_message_id)
            .bind(serde_json::to_string(&message.mentions)?)
            .bind(message.forwarded)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            debug!(message_id = %info.id, "re-delivery of edited message ignored");
            return Ok(false);
        }

        match &message.media {
            Some(media) => upsert_media(conn, &info.id, media).await?,
            None => {
                sqlx::query("DELETE FROM message_media WHERE message_id = ?")
                    .bind(&info.id)
                    .execute(&mut *conn)
                    .await?;
            }
        }

        Ok(true)
    }

    fn committed(&mut self, written: &bool) {
        if *written {
            self.chat_list.advance(self.summary());
        }
    }
}

/// Apply an edit to an existing message.
pub(crate) struct UpdateMessageContentJob {
    message_id: String,
    message: ClassifiedMessage,
    chat_list: Arc<ChatListCache>,
}

impl UpdateMessageContentJob {
    pub(crate) fn new(
        message_id: String,
        message: ClassifiedMessage,
        chat_list: Arc<ChatListCache>,
    ) -> Self {
        Self {
            message_id,
            message,
            chat_list,
        }
    }
}

/// Where an edit landed: the message's chat and its stored kind.
pub(crate) struct EditedMessage {
    pub(crate) chat: Jid,
    pub(crate) kind: MessageKind,
}

#[async_trait]
impl WriteJob for UpdateMessageContentJob {
    /// `None` if the message is not stored.
    type Output = Option<EditedMessage>;

    fn name(&self) -> &'static str {
        "update_message_content"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<Option<EditedMessage>> {
        let row = sqlx::query(UPDATE_MESSAGE_CONTENT)
            .bind(&self.message.text)
            .bind(self.message.media.is_some())
            .bind(&self.message_id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            debug!(message_id = %self.message_id, "edit for unknown message ignored");
            return Ok(None);
        };

        if let Some(media) = &self.message.media {
            upsert_media(conn, &self.message_id, media).await?;
        }

        // A text-only edit of a media message keeps the attachment.
        let media_type: Option<i64> = sqlx::query_scalar(SELECT_MEDIA_TYPE)
            .bind(&self.message_id)
            .fetch_optional(&mut *conn)
            .await?;
        let kind = media_type
            .and_then(MediaKind::from_i64)
            .map_or(MessageKind::Text, MessageKind::from);

        let Ok(chat) = row.get::<&str, _>("chat_jid").parse::<Jid>() else {
            return Ok(None);
        };
        Ok(Some(EditedMessage { chat, kind }))
    }

    fn committed(&mut self, edited: &Option<EditedMessage>) {
        if let Some(edited) = edited {
            let text = summary_text(&self.message.text, edited.kind);
            self.chat_list.retouch(&edited.chat, &self.message_id, &text);
        }
    }
}

impl MessageStore {
    /// Queue a message for insertion and return immediately.
    ///
    /// Reaction content is redirected to the reactions relation, edit
    /// wrappers to [`MessageStore::update_message_content`]. Content that
    /// cannot be classified is logged and dropped.
    pub fn insert_message(
        &self,
        info: &MessageInfo,
        content: &MessageContent,
        rendered: Option<&str>,
    ) -> Result<()> {
        match classify(content, rendered) {
            Classified::Message(message) => self.queue.submit(InsertMessageJob::new(
                info.clone(),
                message,
                Arc::clone(&self.chat_list),
            )),
            Classified::Reaction { target_id, emoji } => {
                self.queue.submit(self.reaction_job(target_id, emoji, &info.sender))
            }
            Classified::Edit { target_id, content } => {
                self.update_message_content(&target_id, &content, rendered)
            }
            Classified::Unsupported(reason) => {
                debug!(message_id = %info.id, reason, "unsupported content dropped");
                Ok(())
            }
        }
    }

    /// Queue an edit of `message_id` and return immediately. Timestamp,
    /// sender and identifiers are never changed by an edit.
    pub fn update_message_content(
        &self,
        message_id: &str,
        content: &MessageContent,
        rendered: Option<&str>,
    ) -> Result<()> {
        match classify(content, rendered) {
            Classified::Message(message) => self.queue.submit(UpdateMessageContentJob::new(
                message_id.to_string(),
                message,
                Arc::clone(&self.chat_list),
            )),
            Classified::Reaction { .. } | Classified::Edit { .. } | Classified::Unsupported(_) => {
                debug!(message_id, "edit content is not a message, ignored");
                Ok(())
            }
        }
    }
}
