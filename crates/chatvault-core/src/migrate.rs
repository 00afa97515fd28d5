//! LID → PN identity migration.
//!
//! The bulk pass walks the messages table by rowid, resolves identities
//! outside the writer, then applies each batch as one queued job. Rows are
//! rewritten independently: a failing row is logged, counted and skipped.
//! The pass is restartable; rows already in canonical form are untouched and
//! rows inserted while it runs land either before or after the cursor.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info, warn};

use crate::chat_list::ChatListCache;
use crate::error::Result;
use crate::identity::canonicalize;
use crate::jid::Jid;
use crate::models::MigrationReport;
use crate::reactions::ReactionCache;
use crate::store::MessageStore;
use crate::write_queue::WriteJob;

const SELECT_MESSAGE_IDENTITY_BATCH: &str = r#"
SELECT rowid, message_id, chat_jid, sender_jid
FROM messages
WHERE rowid > ?
ORDER BY rowid
LIMIT ?
"#;

/// Identity rewrite for one message row.
#[derive(Debug, Clone)]
struct RowRewrite {
    message_id: String,
    old_chat: String,
    new_chat: Option<String>,
    new_sender: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchOutcome {
    chats: u64,
    senders: u64,
    failed: u64,
}

/// Rewrites one batch of message rows.
struct MigrateBatchJob {
    rewrites: Vec<RowRewrite>,
    chat_list: Arc<ChatListCache>,
}

#[async_trait]
impl WriteJob for MigrateBatchJob {
    type Output = BatchOutcome;

    fn name(&self) -> &'static str {
        "migrate_batch"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for rewrite in &self.rewrites {
            let result = sqlx::query(
                "UPDATE messages SET chat_jid = COALESCE(?, chat_jid), \
                 sender_jid = COALESCE(?, sender_jid) WHERE message_id = ?",
            )
            .bind(&rewrite.new_chat)
            .bind(&rewrite.new_sender)
            .bind(&rewrite.message_id)
            .execute(&mut *conn)
            .await;

            match result {
                Ok(done) if done.rows_affected() > 0 => {
                    outcome.chats += u64::from(rewrite.new_chat.is_some());
                    outcome.senders += u64::from(rewrite.new_sender.is_some());
                }
                Ok(_) => {
                    debug!(message_id = %rewrite.message_id, "row vanished before migration");
                }
                Err(err) => {
                    warn!(message_id = %rewrite.message_id, error = %err, "Failed to migrate message");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn committed(&mut self, _outcome: &BatchOutcome) {
        // Both sides may now summarize the wrong row.
        for rewrite in &self.rewrites {
            let Some(new_chat) = &rewrite.new_chat else {
                continue;
            };
            for chat in [rewrite.old_chat.as_str(), new_chat.as_str()] {
                if let Ok(chat) = chat.parse::<Jid>() {
                    self.chat_list.delete(&chat);
                }
            }
        }
    }
}

/// Moves reaction rows from linked sender ids to their phone-number form.
/// Where the canonical sender already reacted, that row wins.
struct MigrateReactionSendersJob {
    senders: Vec<(String, String)>,
    cache: Arc<ReactionCache>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ReactionOutcome {
    moved: u64,
    dropped: u64,
    failed: u64,
}

#[async_trait]
impl WriteJob for MigrateReactionSendersJob {
    type Output = ReactionOutcome;

    fn name(&self) -> &'static str {
        "migrate_reaction_senders"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<ReactionOutcome> {
        let mut outcome = ReactionOutcome::default();

        for (old, new) in &self.senders {
            let result = sqlx::query("UPDATE OR IGNORE reactions SET sender_id = ? WHERE sender_id = ?")
                .bind(new)
                .bind(old)
                .execute(&mut *conn)
                .await;
            match result {
                Ok(done) => outcome.moved += done.rows_affected(),
                Err(err) => {
                    warn!(sender = %old, error = %err, "Failed to migrate reaction sender");
                    outcome.failed += 1;
                    continue;
                }
            }

            // Leftovers collided with an existing canonical reaction.
            match sqlx::query("DELETE FROM reactions WHERE sender_id = ?")
                .bind(old)
                .execute(&mut *conn)
                .await
            {
                Ok(done) => outcome.dropped += done.rows_affected(),
                Err(err) => {
                    warn!(sender = %old, error = %err, "Failed to drop duplicate reactions");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn committed(&mut self, outcome: &ReactionOutcome) {
        // Aggregates are keyed by sender; rebuild them from the relation.
        if outcome.moved > 0 || outcome.dropped > 0 {
            self.cache.clear();
        }
    }
}

/// Points every row of chat `from` at chat `to`.
struct RetargetChatJob {
    from: Jid,
    to: Jid,
    chat_list: Arc<ChatListCache>,
}

#[async_trait]
impl WriteJob for RetargetChatJob {
    type Output = u64;

    fn name(&self) -> &'static str {
        "retarget_chat"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<u64> {
        let done = sqlx::query("UPDATE messages SET chat_jid = ? WHERE chat_jid = ?")
            .bind(self.to.to_string())
            .bind(self.from.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(done.rows_affected())
    }

    fn committed(&mut self, _moved: &u64) {
        self.chat_list.delete(&self.from);
    }
}

impl MessageStore {
    /// Rewrite every stored linked identity that now resolves to a phone
    /// number.
    pub async fn migrate_lid_to_pn(&self) -> Result<MigrationReport> {
        let batch_size = i64::from(self.config.migration_batch_size.max(1));
        let mut report = MigrationReport::default();
        let mut cursor: i64 = 0;

        info!("Starting LID to PN migration");

        loop {
            let rows = sqlx::query(SELECT_MESSAGE_IDENTITY_BATCH)
                .bind(cursor)
                .bind(batch_size)
                .fetch_all(self.db.pool())
                .await?;

            let Some(last) = rows.last() else {
                break;
            };
            cursor = last.get("rowid");
            report.scanned += rows.len() as u64;

            let mut rewrites = Vec::new();
            for row in &rows {
                let message_id: String = row.get("message_id");
                let old_chat: String = row.get("chat_jid");
                let old_sender: String = row.get("sender_jid");

                let new_chat = self.canonical_string(&old_chat).await;
                let new_sender = self.canonical_string(&old_sender).await;
                if new_chat.is_some() || new_sender.is_some() {
                    rewrites.push(RowRewrite {
                        message_id,
                        old_chat,
                        new_chat,
                        new_sender,
                    });
                }
            }

            if !rewrites.is_empty() {
                let outcome = self
                    .queue
                    .run_sync(MigrateBatchJob {
                        rewrites,
                        chat_list: Arc::clone(&self.chat_list),
                    })
                    .await?;
                report.chats_migrated += outcome.chats;
                report.senders_migrated += outcome.senders;
                report.failed += outcome.failed;
            }

            debug!(scanned = report.scanned, cursor, "migration batch done");
            if (rows.len() as i64) < batch_size {
                break;
            }
        }

        let reactions = self.migrate_reaction_senders().await?;
        report.reactions_migrated = reactions.moved;
        report.failed += reactions.failed;

        info!(
            scanned = report.scanned,
            chats = report.chats_migrated,
            senders = report.senders_migrated,
            reactions = report.reactions_migrated,
            failed = report.failed,
            "LID to PN migration finished"
        );
        Ok(report)
    }

    async fn migrate_reaction_senders(&self) -> Result<ReactionOutcome> {
        let rows = sqlx::query("SELECT DISTINCT sender_id FROM reactions WHERE sender_id LIKE '%@lid'")
            .fetch_all(self.db.pool())
            .await?;

        let mut senders = Vec::new();
        for row in &rows {
            let old: String = row.get("sender_id");
            if let Some(new) = self.canonical_string(&old).await {
                senders.push((old, new));
            }
        }
        if senders.is_empty() {
            return Ok(ReactionOutcome::default());
        }

        self.queue
            .run_sync(MigrateReactionSendersJob {
                senders,
                cache: Arc::clone(&self.reactions),
            })
            .await
    }

    /// Canonical form of a stored identity string, if it differs.
    async fn canonical_string(&self, raw: &str) -> Option<String> {
        let jid = raw.parse::<Jid>().ok()?;
        let (canonical, changed) = canonicalize(self.resolver.as_ref(), &jid).await;
        changed.then(|| canonical.to_string())
    }

    /// Move a linked-identity chat onto `chat` the first time the
    /// phone-number form is seen, if the linked form is what the chat list
    /// currently shows. Returns how many rows moved.
    pub(crate) async fn migrate_chat_if_needed(&self, chat: &Jid) -> Result<u64> {
        if !chat.is_pn() || self.chat_list.contains(chat) {
            return Ok(0);
        }

        let alias = match self.resolver.resolve_alias_for(chat).await {
            Ok(Some(alias)) => alias,
            Ok(None) => return Ok(0),
            Err(err) => {
                warn!(chat = %chat, error = %err, "Failed to get LID for PN");
                return Ok(0);
            }
        };
        if !self.chat_list.contains(&alias) {
            return Ok(0);
        }

        let moved = self
            .queue
            .run_sync(RetargetChatJob {
                from: alias.clone(),
                to: chat.clone(),
                chat_list: Arc::clone(&self.chat_list),
            })
            .await?;
        info!(from = %alias, to = %chat, moved, "Migrated chat to phone number");
        Ok(moved)
    }
}
