//! Integration tests for LID to PN identity migration.

use std::sync::Arc;

use chatvault_core::config::StoreConfig;
use chatvault_core::content::MessageContent;
use chatvault_core::models::{MessageEvent, MessageInfo};
use chatvault_core::{Jid, MemoryResolver, MessageStore};
use chrono::DateTime;
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("chatvault-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

async fn open_store(resolver: Arc<MemoryResolver>) -> MessageStore {
    let config = StoreConfig {
        migration_batch_size: 2,
        ..StoreConfig::default()
    };
    MessageStore::open_with_path(&temp_db_path(), config, resolver)
        .await
        .expect("open store")
}

fn event(id: &str, chat: &Jid, sender: &Jid, ts: i64, text: &str) -> MessageEvent {
    MessageEvent {
        info: MessageInfo {
            id: id.to_string(),
            chat: chat.clone(),
            sender: sender.clone(),
            timestamp: DateTime::from_timestamp(ts, 0).expect("timestamp"),
            is_from_me: false,
            push_name: None,
        },
        content: MessageContent::text(text),
    }
}

async fn history_ids(store: &MessageStore, chat: &Jid) -> Vec<String> {
    store
        .get_decoded_messages_paged(chat, 0, 100)
        .await
        .expect("page")
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[tokio::test]
async fn known_lid_is_canonicalized_on_ingest() {
    let resolver = Arc::new(MemoryResolver::new());
    resolver.insert("77", "1001");
    let store = open_store(resolver).await;

    store
        .process_message_event(&event("m1", &Jid::lid("77"), &Jid::lid("77"), 100, "hi"), None)
        .await
        .expect("insert");

    assert_eq!(history_ids(&store, &Jid::pn("1001")).await, vec!["m1"]);
    assert!(history_ids(&store, &Jid::lid("77")).await.is_empty());
}

#[tokio::test]
async fn bulk_pass_moves_all_rows_to_phone_number() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let lid = Jid::lid("77");
    let pn = Jid::pn("1001");

    for n in 0..5 {
        store
            .process_message_event(&event(&format!("m{n}"), &lid, &lid, 100 + n, "x"), None)
            .await
            .expect("insert");
    }
    assert_eq!(history_ids(&store, &lid).await.len(), 5);

    resolver.insert("77", "1001");
    let report = store.migrate_lid_to_pn().await.expect("migrate");

    assert_eq!(report.scanned, 5);
    assert_eq!(report.chats_migrated, 5);
    assert_eq!(report.senders_migrated, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(history_ids(&store, &pn).await.len(), 5);
    assert!(history_ids(&store, &lid).await.is_empty());
}

#[tokio::test]
async fn bulk_pass_is_restartable() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let lid = Jid::lid("77");

    for n in 0..3 {
        store
            .process_message_event(&event(&format!("m{n}"), &lid, &lid, 100 + n, "x"), None)
            .await
            .expect("insert");
    }
    resolver.insert("77", "1001");

    let first = store.migrate_lid_to_pn().await.expect("migrate");
    let second = store.migrate_lid_to_pn().await.expect("migrate again");

    assert!(first.changed());
    assert!(!second.changed());
    assert_eq!(second.scanned, 3);
}

#[tokio::test]
async fn bulk_pass_refreshes_phone_number_summary() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let lid = Jid::lid("77");
    let pn = Jid::pn("1001");

    store
        .process_message_event(&event("p1", &pn, &pn, 100, "from pn"), None)
        .await
        .expect("insert");
    store
        .process_message_event(&event("l1", &lid, &lid, 200, "from lid"), None)
        .await
        .expect("insert");
    assert_eq!(store.get_chat_list().await.expect("warm").len(), 2);

    resolver.insert("77", "1001");
    store.migrate_lid_to_pn().await.expect("migrate");

    let chats = store.get_chat_list().await.expect("chat list");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].jid, pn);
    assert_eq!(chats[0].message_id, "l1");
    assert_eq!(chats[0].message_time, 200);
}

#[tokio::test]
async fn group_senders_are_migrated_without_touching_the_group() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let group = Jid::new("120363", "g.us");

    store
        .process_message_event(&event("m1", &group, &Jid::lid("77"), 100, "hi"), None)
        .await
        .expect("insert");
    resolver.insert("77", "1001");

    let report = store.migrate_lid_to_pn().await.expect("migrate");
    assert_eq!(report.chats_migrated, 0);
    assert_eq!(report.senders_migrated, 1);

    let stored = store
        .get_decoded_message(&group, "m1")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(stored.sender, Jid::pn("1001"));
}

#[tokio::test]
async fn reaction_senders_follow_the_mapping() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let chat = Jid::pn("1002");

    store
        .process_message_event(&event("m1", &chat, &chat, 100, "hi"), None)
        .await
        .expect("insert");
    store
        .add_reaction_to_message("m1", "x", &Jid::lid("77"))
        .await
        .expect("react as lid");
    store
        .add_reaction_to_message("m1", "y", &Jid::pn("1001"))
        .await
        .expect("react as pn");
    store
        .add_reaction_to_message("m2", "z", &Jid::lid("77"))
        .await
        .expect_err("unknown target");
    store.get_reactions_by_message_id("m1").await.expect("warm");

    resolver.insert("77", "1001");
    let report = store.migrate_lid_to_pn().await.expect("migrate");
    assert_eq!(report.reactions_migrated, 0);
    assert!(store.reaction_cache().is_empty());

    // The canonical sender's own reaction wins over the alias row.
    let reactions = store.get_reactions_by_message_id("m1").await.expect("get");
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "y");
    assert_eq!(reactions[0].senders, vec!["1001@s.whatsapp.net"]);
}

#[tokio::test]
async fn reaction_rows_move_when_no_canonical_row_exists() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let chat = Jid::pn("1002");

    store
        .process_message_event(&event("m1", &chat, &chat, 100, "hi"), None)
        .await
        .expect("insert");
    store
        .add_reaction_to_message("m1", "x", &Jid::lid("77"))
        .await
        .expect("react");

    resolver.insert("77", "1001");
    let report = store.migrate_lid_to_pn().await.expect("migrate");
    assert_eq!(report.reactions_migrated, 1);

    let reactions = store.get_reactions_by_message_id("m1").await.expect("get");
    assert_eq!(reactions[0].senders, vec!["1001@s.whatsapp.net"]);
}

#[tokio::test]
async fn first_phone_number_event_moves_the_linked_chat() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let lid = Jid::lid("77");
    let pn = Jid::pn("1001");

    store
        .process_message_event(&event("m1", &lid, &lid, 100, "old"), None)
        .await
        .expect("insert");
    store
        .process_message_event(&event("m2", &lid, &lid, 101, "older"), None)
        .await
        .expect("insert");
    store.get_chat_list().await.expect("warm cache");
    assert!(store.chat_list_cache().contains(&lid));

    resolver.insert("77", "1001");
    store
        .process_message_event(&event("m3", &pn, &pn, 200, "new"), None)
        .await
        .expect("insert");

    assert!(!store.chat_list_cache().contains(&lid));
    assert!(history_ids(&store, &lid).await.is_empty());
    assert_eq!(history_ids(&store, &pn).await, vec!["m1", "m2", "m3"]);

    let chats = store.get_chat_list().await.expect("chat list");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].jid, pn);
    assert_eq!(chats[0].message_id, "m3");
}

#[tokio::test]
async fn cold_linked_chat_waits_for_the_bulk_pass() {
    let resolver = Arc::new(MemoryResolver::new());
    let store = open_store(Arc::clone(&resolver)).await;
    let lid = Jid::lid("77");
    let pn = Jid::pn("1001");

    store
        .process_message_event(&event("m1", &lid, &lid, 100, "old"), None)
        .await
        .expect("insert");

    resolver.insert("77", "1001");
    store
        .process_message_event(&event("m2", &pn, &pn, 200, "new"), None)
        .await
        .expect("insert");

    assert_eq!(history_ids(&store, &lid).await, vec!["m1"]);

    store.migrate_lid_to_pn().await.expect("migrate");
    assert_eq!(history_ids(&store, &pn).await, vec!["m1", "m2"]);
}
