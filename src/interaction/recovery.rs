//! Startup reconciliation against channel history.
//!
//! The marker reaction left on handled messages is the only state that
//! survives a restart. On startup the channel is paged backward from now until
//! the marker shows up; everything processable above it is queued again.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::{
    base::{config::Config, types::Res, work::WorkItem},
    service::chat::ChatClient,
    state::CorrelationStore,
};

use super::filter::IngestFilter;

/// Walks recent channel history back to the last handled message.
#[derive(Clone)]
pub struct RecoveryScanner {
    chat: ChatClient,
    filter: IngestFilter,
    store: CorrelationStore,
    marker_reaction: String,
    lookback: Duration,
    page_size: u16,
}

impl RecoveryScanner {
    pub fn new(chat: ChatClient, filter: IngestFilter, store: CorrelationStore, marker_reaction: impl Into<String>, lookback: Duration, page_size: u16) -> Self {
        Self {
            chat,
            filter,
            store,
            marker_reaction: marker_reaction.into(),
            lookback,
            page_size,
        }
    }

    pub fn from_config(config: &Config, chat: ChatClient, filter: IngestFilter, store: CorrelationStore) -> Res<Self> {
        let lookback = Duration::try_days(i64::from(config.recovery_lookback_days))
            .ok_or_else(|| anyhow::anyhow!("Recovery lookback of {} days is out of range.", config.recovery_lookback_days))?;

        Ok(Self::new(chat, filter, store, config.marker_reaction.clone(), lookback, config.recovery_page_size))
    }

    /// Produces the `new` work items missed while the process was down, oldest first.
    pub async fn recover(&self) -> Res<Vec<WorkItem>> {
        self.recover_at(Utc::now()).await
    }

    #[instrument(name = "RecoveryScanner::recover", skip(self))]
    pub async fn recover_at(&self, now: DateTime<Utc>) -> Res<Vec<WorkItem>> {
        let oldest = now
            .checked_sub_signed(self.lookback)
            .map(slack_ts)
            .ok_or_else(|| anyhow::anyhow!("Recovery lookback of {} reaches before the representable range.", self.lookback))?;
        let channel_id = self.filter.channel_id();

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        let mut marker_found = false;

        'pages: loop {
            let page = self.chat.fetch_history(channel_id, &oldest, cursor.as_deref(), self.page_size).await?;

            for message in page.messages {
                if message.reactions.iter().any(|r| r == &self.marker_reaction) {
                    info!("Found marker on {}.", message.ts);
                    marker_found = true;
                    break 'pages;
                }

                if self.filter.is_processable(&message) {
                    collected.push(message);
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if !marker_found && !collected.is_empty() {
            warn!("No marker within the lookback window; treating this as a first run and skipping {} message(s).", collected.len());
            return Ok(Vec::new());
        }

        // History pages are newest first.
        collected.reverse();

        let items: Vec<WorkItem> = collected.into_iter().filter(|m| self.store.mark_queued(&m.ts)).map(WorkItem::New).collect();

        info!("Recovered {} message(s) from history.", items.len());

        Ok(items)
    }
}

/// Formats a wall-clock instant as a chat timestamp (`seconds.micros`).
fn slack_ts(instant: DateTime<Utc>) -> String {
    format!("{}.{:06}", instant.timestamp(), instant.timestamp_subsec_micros())
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_timestamps() {
        let instant = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(slack_ts(instant), "1700000000.123456");
    }
}
