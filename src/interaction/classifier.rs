//! Assigns each admitted chat event a handling category.

use tracing::debug;

use crate::{
    base::{
        types::ChatEvent,
        work::{DeferredFollowup, DirectCommand, MessageDeleted, MessageEdited, OrphanThread, ThreadReply, WorkItem},
    },
    state::CorrelationStore,
};

/// Shapes chat events into work items using the current correlation state.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    mention_token: String,
}

impl EventClassifier {
    pub fn new(bot_user_id: &str) -> Self {
        Self {
            mention_token: format!("<@{bot_user_id}>"),
        }
    }

    /// Classifies an event, or returns `None` when it should be dropped.
    ///
    /// Top-level messages are recorded in the store's dedup set as a side
    /// effect; a message already recorded there yields `None`.
    pub fn classify(&self, event: ChatEvent, store: &CorrelationStore) -> Option<WorkItem> {
        let message = match event {
            ChatEvent::Edited {
                channel,
                ts,
                thread_ts,
                user,
                previous_text,
                text,
            } => {
                return Some(WorkItem::MessageEdited(MessageEdited {
                    channel,
                    ts,
                    thread_ts,
                    user,
                    previous_text,
                    text,
                }));
            }
            ChatEvent::Deleted { channel, ts, thread_ts } => {
                return Some(WorkItem::MessageDeleted(MessageDeleted { channel, ts, thread_ts }));
            }
            ChatEvent::Message(message) => message,
        };

        // Mentions of the bot win over every other shape.

        if message.text.as_deref().is_some_and(|t| t.contains(&self.mention_token)) {
            let ticket = store.thread(message.thread_key()).and_then(|o| o.ticket());
            return Some(WorkItem::DirectCommand(DirectCommand { message, ticket }));
        }

        // Replies are routed by what is known about their thread.

        if message.is_thread_reply() {
            let thread_ts = message.thread_key().to_string();

            return Some(match store.thread(&thread_ts) {
                Some(outcome) if outcome.is_deferred => WorkItem::DeferredFollowup(DeferredFollowup {
                    original_context: outcome.original_context.unwrap_or_default(),
                    original_reporter_id: outcome.original_reporter_id,
                    message,
                    thread_ts,
                }),
                Some(outcome) => match outcome.ticket() {
                    Some(ticket) => {
                        let same_reporter = outcome.original_reporter_id.as_deref().is_some_and(|r| r == message.user_id());

                        WorkItem::ThreadReply(ThreadReply {
                            message,
                            thread_ts,
                            ticket,
                            is_duplicate: outcome.is_duplicate,
                            same_reporter,
                        })
                    }
                    None => WorkItem::OrphanThread(OrphanThread { message, thread_ts }),
                },
                None => WorkItem::OrphanThread(OrphanThread { message, thread_ts }),
            });
        }

        // Top-level messages are queued at most once.

        if !store.mark_queued(&message.ts) {
            debug!("Dropping already-queued message {}.", message.ts);
            return None;
        }

        Some(WorkItem::New(message))
    }
}

// Tests.
