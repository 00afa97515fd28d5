//! chatvault CLI - embedded message store for chat clients

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chatvault_core::{Config, Jid, MemoryResolver, MessageStore};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

mod ingest;

#[derive(Debug, Parser)]
#[command(
    name = "chatvault",
    author,
    version,
    about = "Embedded message store for chat clients",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long, global = true, env = "CHATVAULT_DATABASE")]
    database: Option<PathBuf>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List chats, newest first
    Chats,

    /// Show a page of a chat's history
    History {
        /// Chat JID (bare numbers are phone-number identities)
        chat: String,

        /// Only messages older than this Unix timestamp (0 = latest)
        #[arg(long, default_value = "0")]
        before: i64,

        /// Page size
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show a single message
    Show {
        /// Message ID
        id: String,
    },

    /// Show reactions on a message
    Reactions {
        /// Message ID
        id: String,
    },

    /// Import message events from a JSON Lines file
    Ingest {
        /// Path to the events file
        file: PathBuf,
    },

    /// Rewrite stored linked identities to phone numbers
    Migrate,

    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let mut config = Config::ensure_at(&config_path)?;
    if let Some(database) = cli.database {
        config.database = database;
    }

    let resolver = Arc::new(MemoryResolver::from_config(&config.identity));
    let store = MessageStore::open(&config, resolver).await?;

    let result = match cli.command {
        Command::Chats => cmd_chats(&store, cli.json).await,
        Command::History {
            chat,
            before,
            limit,
        } => cmd_history(&store, &chat, before, limit, cli.json).await,
        Command::Show { id } => cmd_show(&store, &id, cli.json).await,
        Command::Reactions { id } => cmd_reactions(&store, &id, cli.json).await,
        Command::Ingest { file } => cmd_ingest(&store, &file).await,
        Command::Migrate => cmd_migrate(&store, cli.json).await,
        Command::Stats => cmd_stats(&store).await,
    };

    store.close().await;
    result
}

async fn cmd_chats(store: &MessageStore, json: bool) -> Result<()> {
    let chats = store.get_chat_list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
        return Ok(());
    }
    if chats.is_empty() {
        println!("No chats found.");
        return Ok(());
    }

    for chat in chats {
        println!(
            "{} | {} | {}: {}",
            chat.jid,
            format_time(chat.message_time),
            chat.sender,
            truncate(&chat.message_text, 80)
        );
    }

    Ok(())
}

async fn cmd_history(
    store: &MessageStore,
    chat: &str,
    before: i64,
    limit: i64,
    json: bool,
) -> Result<()> {
    let chat: Jid = chat.parse()?;
    let messages = store
        .get_decoded_messages_paged(&chat, before, limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No messages found.");
        return Ok(());
    }

    for msg in &messages {
        let who = if msg.is_from_me {
            "You".to_string()
        } else {
            msg.push_name.clone().unwrap_or_else(|| msg.sender.user.clone())
        };
        let mut flags = String::new();
        if msg.edited {
            flags.push_str(" (edited)");
        }
        if msg.forwarded {
            flags.push_str(" (forwarded)");
        }
        let media = msg
            .media_type
            .map(|kind| format!("[{kind}] "))
            .unwrap_or_default();
        println!(
            "{} {} | {}: {}{}{}",
            msg.id,
            msg.timestamp.format("%Y-%m-%d %H:%M"),
            who,
            media,
            truncate(&msg.text, 120),
            flags
        );
    }

    if let Some(oldest) = messages.first() {
        println!();
        println!("Older: --before {}", oldest.timestamp.timestamp());
    }

    Ok(())
}

async fn cmd_show(store: &MessageStore, id: &str, json: bool) -> Result<()> {
    let message = store
        .get_message_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Message not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&message)?);
        return Ok(());
    }

    let msg = &message.message;
    println!("ID:      {}", msg.id);
    println!("Chat:    {}", msg.chat);
    println!("Sender:  {}", msg.sender);
    println!("Time:    {}", msg.timestamp);
    if let Some(reply) = &msg.reply_to_message_id {
        println!("Reply:   {reply}");
    }
    println!("Edited:  {}", msg.edited);
    if let Some(media) = &message.media {
        println!(
            "Media:   {} {}",
            media.kind,
            media.mimetype.as_deref().unwrap_or("")
        );
        if let Some(name) = &media.file_name {
            println!("File:    {name}");
        }
    }
    println!();
    println!("{}", msg.text);

    Ok(())
}

async fn cmd_reactions(store: &MessageStore, id: &str, json: bool) -> Result<()> {
    let reactions = store.get_reactions_by_message_id(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reactions)?);
        return Ok(());
    }
    if reactions.is_empty() {
        println!("No reactions.");
        return Ok(());
    }

    for group in reactions {
        println!("{} {}: {}", group.emoji, group.senders.len(), group.senders.join(", "));
    }

    Ok(())
}

async fn cmd_ingest(store: &MessageStore, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let summary = ingest::ingest(store, BufReader::new(file)).await?;
    store.flush().await?;

    println!(
        "Stored {}, ignored {}, failed {}",
        summary.stored, summary.ignored, summary.failed
    );
    Ok(())
}

async fn cmd_migrate(store: &MessageStore, json: bool) -> Result<()> {
    let report = store.migrate_lid_to_pn().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Scanned:   {}", report.scanned);
    println!("Chats:     {}", report.chats_migrated);
    println!("Senders:   {}", report.senders_migrated);
    println!("Reactions: {}", report.reactions_migrated);
    println!("Failed:    {}", report.failed);
    Ok(())
}

async fn cmd_stats(store: &MessageStore) -> Result<()> {
    let chat_count = store.count_chats().await?;
    let msg_count = store.count_messages().await?;

    println!("Database Statistics");
    println!("-------------------");
    println!("Chats:    {}", chat_count);
    println!("Messages: {}", msg_count);

    Ok(())
}

fn format_time(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo world", 5), "héllo...");
        assert_eq!(truncate("a\nb", 10), "a b");
    }

    #[test]
    fn format_time_is_utc() {
        assert_eq!(format_time(0), "1970-01-01 00:00");
    }
}
