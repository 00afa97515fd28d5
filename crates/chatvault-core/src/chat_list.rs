//! Chat summary cache and the chat list query.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use sqlx::Row;
use tracing::debug;

use crate::error::Result;
use crate::jid::Jid;
use crate::models::ChatSummary;
use crate::query::decoded_from_row;
use crate::store::MessageStore;

const SELECT_CHAT_LIST: &str = r#"
SELECT m.message_id, m.chat_jid, m.sender_jid, m.push_name, m.timestamp, m.is_from_me, m.text,
       m.reply_to_message_id, m.mentions, m.edited, m.forwarded, mm.type AS media_type, mm.file_name
FROM (
    SELECT message_id, chat_jid, sender_jid, push_name, timestamp, is_from_me, text,
           reply_to_message_id, mentions, edited, forwarded,
           ROW_NUMBER() OVER (
               PARTITION BY chat_jid
               ORDER BY timestamp DESC, rowid DESC
           ) AS rn
    FROM messages
) AS m
LEFT JOIN message_media AS mm ON mm.message_id = m.message_id
WHERE m.rn = 1
ORDER BY m.timestamp DESC
"#;

struct CachedSummary {
    summary: ChatSummary,
    stored_at: Instant,
}

/// Time-bounded map from chat identity to its latest-message summary.
pub struct ChatListCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSummary>>,
}

impl ChatListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &CachedSummary) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    /// Fresh cached summary for `jid`.
    pub fn get(&self, jid: &Jid) -> Option<ChatSummary> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&jid.to_string())
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.summary.clone())
    }

    pub fn contains(&self, jid: &Jid) -> bool {
        self.get(jid).is_some()
    }

    pub fn set(&self, summary: ChatSummary) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            summary.jid.to_string(),
            CachedSummary {
                summary,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn delete(&self, jid: &Jid) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&jid.to_string()).is_some()
    }

    /// Replace the cached summary if one exists and is not newer than
    /// `summary`. Absent entries are left for the next chat list read, which
    /// recomputes them from the table.
    pub fn advance(&self, summary: ChatSummary) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = summary.jid.to_string();
        match entries.get_mut(&key) {
            Some(entry) if entry.summary.message_time <= summary.message_time => {
                entry.summary = summary;
                entry.stored_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Cache a summary recomputed from the table unless a fresh entry at
    /// least as new is already there. Returns the summary left in the cache.
    pub fn offer(&self, summary: ChatSummary) -> ChatSummary {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = summary.jid.to_string();
        let kept = entries.get(&key).filter(|entry| {
            self.is_fresh(entry) && entry.summary.message_time >= summary.message_time
        });
        if let Some(entry) = kept {
            return entry.summary.clone();
        }
        entries.insert(
            key,
            CachedSummary {
                summary: summary.clone(),
                stored_at: Instant::now(),
            },
        );
        summary
    }

    /// Rewrite the text of a cached summary that points at `message_id`.
    pub fn retouch(&self, chat: &Jid, message_id: &str, message_text: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&chat.to_string()) {
            Some(entry) if entry.summary.message_id == message_id => {
                entry.summary.message_text = message_text.to_string();
                true
            }
            _ => false,
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageStore {
    /// Latest message per chat, newest chat first.
    ///
    /// Fresh cached summaries are returned as-is; missing or expired ones are
    /// recomputed from the row just read and cached again.
    pub async fn get_chat_list(&self) -> Result<Vec<ChatSummary>> {
        let purged = self.chat_list.purge_expired();
        if purged > 0 {
            debug!(purged, "expired chat summaries dropped");
        }

        let rows = sqlx::query(SELECT_CHAT_LIST)
            .fetch_all(self.db.pool())
            .await?;

        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            let Ok(chat) = row.get::<&str, _>("chat_jid").parse::<Jid>() else {
                debug!(chat = row.get::<&str, _>("chat_jid"), "skipping unparsable chat");
                continue;
            };

            if let Some(cached) = self.chat_list.get(&chat) {
                chats.push(cached);
                continue;
            }

            let Some(message) = decoded_from_row(&row) else {
                continue;
            };
            chats.push(self.chat_list.offer(ChatSummary::from_message(&message)));
        }

        Ok(chats)
    }

    /// Direct access to the chat summary cache.
    pub fn chat_list_cache(&self) -> &ChatListCache {
        &self.chat_list
    }
}
