//! JSON Lines event import.

use std::io::BufRead;

use anyhow::{Context, Result};
use chatvault_core::MessageStore;
use chatvault_core::models::MessageEvent;
use serde::Deserialize;

/// One line of an import file: a transport event plus optional pre-rendered
/// body text.
#[derive(Debug, Deserialize)]
pub struct EventLine {
    #[serde(flatten)]
    pub event: MessageEvent,
    #[serde(default)]
    pub rendered: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub ignored: usize,
    pub failed: usize,
}

/// Parse one non-blank line.
pub fn parse_line(line: &str) -> Result<EventLine> {
    serde_json::from_str(line).context("invalid event line")
}

/// Feed every event of `reader` through the store, in file order.
pub async fn ingest<R: BufRead>(store: &MessageStore, reader: R) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "Skipping event");
                summary.failed += 1;
                continue;
            }
        };

        match store
            .process_message_event(&parsed.event, parsed.rendered.as_deref())
            .await
        {
            Ok(Some(_)) => summary.stored += 1,
            Ok(None) => summary.ignored += 1,
            Err(err) => {
                tracing::warn!(line = index + 1, id = %parsed.event.info.id, error = %err, "Failed to store event");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
