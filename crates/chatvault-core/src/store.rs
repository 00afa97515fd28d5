//! The message store façade.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::chat_list::ChatListCache;
use crate::config::{Config, StoreConfig};
use crate::content::{Classified, classify};
use crate::db::Database;
use crate::error::Result;
use crate::identity::{IdentityResolver, canonicalize};
use crate::messages::{InsertMessageJob, UpdateMessageContentJob};
use crate::models::{MessageEvent, MessageInfo};
use crate::reactions::ReactionCache;
use crate::write_queue::WriteQueue;

/// Embedded message store.
///
/// Owns the database pool, the single writer and both in-memory caches.
/// Must be opened from within a tokio runtime.
pub struct MessageStore {
    pub(crate) db: Database,
    pub(crate) queue: WriteQueue,
    pub(crate) chat_list: Arc<ChatListCache>,
    pub(crate) reactions: Arc<ReactionCache>,
    pub(crate) resolver: Arc<dyn IdentityResolver>,
    pub(crate) config: StoreConfig,
}

impl MessageStore {
    /// Open the store at the configured database path.
    pub async fn open(config: &Config, resolver: Arc<dyn IdentityResolver>) -> Result<Self> {
        Self::open_with_path(&config.database, config.store.clone(), resolver).await
    }

    /// Open the store at an explicit path.
    pub async fn open_with_path(
        path: &Path,
        config: StoreConfig,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self> {
        let db = Database::open(path, &config).await?;
        let queue = WriteQueue::spawn(db.pool().clone());
        info!(path = %path.display(), "message store opened");

        Ok(Self {
            db,
            queue,
            chat_list: Arc::new(ChatListCache::new(config.chat_list_ttl())),
            reactions: Arc::new(ReactionCache::new()),
            resolver,
            config,
        })
    }

    /// Persist one inbound or outbound event.
    ///
    /// Chat and sender are canonicalized first. If the chat is a phone-number
    /// identity whose linked alias still has rows, those rows are moved over
    /// before the event is written. Returns the id of the message row the
    /// event landed on (the target for edits and reactions), or `None` when
    /// nothing was stored.
    pub async fn process_message_event(
        &self,
        event: &MessageEvent,
        rendered: Option<&str>,
    ) -> Result<Option<String>> {
        let (chat, _) = canonicalize(self.resolver.as_ref(), &event.info.chat).await;
        let (sender, _) = canonicalize(self.resolver.as_ref(), &event.info.sender).await;

        self.migrate_chat_if_needed(&chat).await?;

        let info = MessageInfo {
            chat,
            sender,
            ..event.info.clone()
        };

        match classify(&event.content, rendered) {
            Classified::Message(message) => {
                let job = InsertMessageJob::new(info.clone(), message, Arc::clone(&self.chat_list));
                self.queue.run_sync(job).await?;
                Ok(Some(info.id))
            }
            Classified::Edit { target_id, content } => {
                let Classified::Message(message) = classify(&content, rendered) else {
                    debug!(message_id = %target_id, "edit content is not a message, ignored");
                    return Ok(None);
                };
                let job = UpdateMessageContentJob::new(
                    target_id.clone(),
                    message,
                    Arc::clone(&self.chat_list),
                );
                let edited = self.queue.run_sync(job).await?;
                Ok(edited.map(|_| target_id))
            }
            Classified::Reaction { target_id, emoji } => {
                self.add_reaction_to_message(&target_id, &emoji, &info.sender)
                    .await?;
                Ok(Some(target_id))
            }
            Classified::Unsupported(reason) => {
                debug!(message_id = %info.id, reason, "unsupported content dropped");
                Ok(None)
            }
        }
    }

    /// Wait for every queued write to finish.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// Drain the write queue and close the pool.
    pub async fn close(&self) {
        self.queue.shutdown().await;
        self.db.close().await;
        info!("message store closed");
    }

    pub fn resolver(&self) -> &dyn IdentityResolver {
        self.resolver.as_ref()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
