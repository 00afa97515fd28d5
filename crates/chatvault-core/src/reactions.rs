//! Reaction relation and its in-memory aggregation cache.
//!
//! The cache maps message id → emoji → senders in reaction order. It is only
//! ever mutated from the write queue (after a commit, or when a cold message
//! is loaded), so readers never see it disagree with committed rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};

use crate::error::{Error, Result};
use crate::jid::Jid;
use crate::models::ReactionGroup;
use crate::store::MessageStore;
use crate::write_queue::WriteJob;

type Aggregate = BTreeMap<String, Vec<String>>;

/// message id → emoji → senders.
#[derive(Default)]
pub struct ReactionCache {
    entries: RwLock<HashMap<String, Aggregate>>,
}

fn groups(aggregate: &Aggregate) -> Vec<ReactionGroup> {
    aggregate
        .iter()
        .map(|(emoji, senders)| ReactionGroup {
            emoji: emoji.clone(),
            senders: senders.clone(),
        })
        .collect()
}

fn aggregate_rows(rows: &[(String, String)]) -> Aggregate {
    let mut aggregate = Aggregate::new();
    for (sender, emoji) in rows {
        aggregate
            .entry(emoji.clone())
            .or_default()
            .push(sender.clone());
    }
    aggregate
}

impl ReactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: &str) -> Option<Vec<ReactionGroup>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(message_id).map(groups)
    }

    /// Install rows loaded from the relation unless the message is already
    /// cached.
    fn load(&self, message_id: &str, rows: &[(String, String)]) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(message_id.to_string())
            .or_insert_with(|| aggregate_rows(rows));
    }

    /// Apply a committed reaction change to a cached message. Messages that
    /// are not cached are left alone; they load from the relation later.
    fn apply(&self, message_id: &str, sender: &str, emoji: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(aggregate) = entries.get_mut(message_id) else {
            return;
        };

        for senders in aggregate.values_mut() {
            senders.retain(|s| s != sender);
        }
        aggregate.retain(|_, senders| !senders.is_empty());

        if !emoji.is_empty() {
            aggregate
                .entry(emoji.to_string())
                .or_default()
                .push(sender.to_string());
        }
    }

    pub fn evict(&self, message_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(message_id).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
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

/// Replace (or retract) one sender's reaction on one message.
pub(crate) struct AddReactionJob {
    message_id: String,
    sender: String,
    emoji: String,
    cache: Arc<ReactionCache>,
}

#[async_trait]
impl WriteJob for AddReactionJob {
    type Output = ();

    fn name(&self) -> &'static str {
        "add_reaction"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM reactions WHERE message_id = ? AND sender_id = ?")
            .bind(&self.message_id)
            .bind(&self.sender)
            .execute(&mut *conn)
            .await?;

        if !self.emoji.is_empty() {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM messages WHERE message_id = ?")
                    .bind(&self.message_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("message {}", self.message_id)));
            }

            sqlx::query("INSERT INTO reactions (message_id, sender_id, emoji) VALUES (?, ?, ?)")
                .bind(&self.message_id)
                .bind(&self.sender)
                .bind(&self.emoji)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    fn committed(&mut self, _output: &()) {
        self.cache.apply(&self.message_id, &self.sender, &self.emoji);
    }
}

/// Populate the cache for a cold message at the write serialization point.
struct LoadReactionsJob {
    message_id: String,
    cache: Arc<ReactionCache>,
}

#[async_trait]
impl WriteJob for LoadReactionsJob {
    /// (sender, emoji) rows in reaction order.
    type Output = Vec<(String, String)>;

    fn name(&self) -> &'static str {
        "load_reactions"
    }

    async fn run(&mut self, conn: &mut SqliteConnection) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT sender_id, emoji FROM reactions WHERE message_id = ? ORDER BY id ASC",
        )
        .bind(&self.message_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("sender_id"), row.get("emoji")))
            .collect())
    }

    fn committed(&mut self, rows: &Vec<(String, String)>) {
        self.cache.load(&self.message_id, rows);
    }
}

impl MessageStore {
    pub(crate) fn reaction_job(
        &self,
        message_id: String,
        emoji: String,
        sender: &Jid,
    ) -> AddReactionJob {
        AddReactionJob {
            message_id,
            // One reaction per contact, whichever device sent it.
            sender: sender.to_non_ad().to_string(),
            emoji,
            cache: Arc::clone(&self.reactions),
        }
    }

    /// Set `sender`'s reaction on `target_id` to `emoji`; an empty emoji
    /// retracts it. Waits for the write to commit.
    pub async fn add_reaction_to_message(
        &self,
        target_id: &str,
        emoji: &str,
        sender: &Jid,
    ) -> Result<()> {
        let job = self.reaction_job(target_id.to_string(), emoji.to_string(), sender);
        self.queue.run_sync(job).await
    }

    /// Reactions on a message grouped by emoji.
    pub async fn get_reactions_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Vec<ReactionGroup>> {
        if let Some(cached) = self.reactions.get(message_id) {
            return Ok(cached);
        }

        let rows = self
            .queue
            .run_sync(LoadReactionsJob {
                message_id: message_id.to_string(),
                cache: Arc::clone(&self.reactions),
            })
            .await?;

        Ok(self
            .reactions
            .get(message_id)
            .unwrap_or_else(|| groups(&aggregate_rows(&rows))))
    }

    /// Direct access to the reaction cache.
    pub fn reaction_cache(&self) -> &ReactionCache {
        &self.reactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(s, e)| ((*s).to_string(), (*e).to_string()))
            .collect()
    }

    #[test]
    fn load_groups_by_emoji_in_row_order() {
        let cache = ReactionCache::new();
        cache.load("m1", &rows(&[("a", "\u{1f44d}"), ("b", "\u{2764}"), ("c", "\u{1f44d}")]));
        let groups = cache.get("m1").expect("cached");
        let thumbs = groups.iter().find(|g| g.emoji == "\u{1f44d}").expect("thumbs");
        assert_eq!(thumbs.senders, vec!["a", "c"]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn load_does_not_overwrite_warm_entry() {
        let cache = ReactionCache::new();
        cache.load("m1", &rows(&[("a", "x")]));
        cache.load("m1", &rows(&[]));
        assert_eq!(cache.get("m1").map(|g| g.len()), Some(1));
    }

    #[test]
    fn apply_moves_sender_between_emojis() {
        let cache = ReactionCache::new();
        cache.load("m1", &rows(&[("a", "x"), ("b", "x")]));
        cache.apply("m1", "a", "y");
        let groups = cache.get("m1").expect("cached");
        assert_eq!(
            groups,
            vec![
                ReactionGroup {
                    emoji: "x".to_string(),
                    senders: vec!["b".to_string()]
                },
                ReactionGroup {
                    emoji: "y".to_string(),
                    senders: vec!["a".to_string()]
                },
            ]
        );
    }

    #[test]
    fn retraction_drops_empty_groups() {
        let cache = ReactionCache::new();
        cache.load("m1", &rows(&[("a", "x")]));
        cache.apply("m1", "a", "");
        assert_eq!(cache.get("m1"), Some(Vec::new()));
    }

    #[test]
    fn apply_ignores_cold_messages() {
        let cache = ReactionCache::new();
        cache.apply("m1", "a", "x");
        assert!(cache.get("m1").is_none());
        assert!(cache.is_empty());
    }
}
