//! Database schema for chatvault.

/// SQL schema, applied idempotently every time the store is opened.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    chat_jid TEXT NOT NULL,
    sender_jid TEXT NOT NULL,
    push_name TEXT,
    timestamp INTEGER NOT NULL,
    is_from_me BOOLEAN NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    has_media BOOLEAN NOT NULL DEFAULT FALSE,
    reply_to_message_id TEXT,
    mentions TEXT NOT NULL DEFAULT '[]',
    edited BOOLEAN NOT NULL DEFAULT FALSE,
    forwarded BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_jid, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_messages_sender_jid ON messages(sender_jid);

CREATE TABLE IF NOT EXISTS message_media (
    message_id TEXT PRIMARY KEY,
    type INTEGER NOT NULL,
    url TEXT,
    mimetype TEXT,
    direct_path TEXT,
    media_key BLOB,
    file_sha256 BLOB,
    file_enc_sha256 BLOB,
    width INTEGER,
    height INTEGER,
    file_name TEXT,
    FOREIGN KEY (message_id) REFERENCES messages(message_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS reactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    emoji TEXT NOT NULL,
    UNIQUE (message_id, sender_id),
    FOREIGN KEY (message_id) REFERENCES messages(message_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_reactions_message_id ON reactions(message_id);
CREATE INDEX IF NOT EXISTS idx_reactions_sender_id ON reactions(sender_id);
"#;
