//! Normalized units of work handed from the classifier to the queue.

use std::fmt;

use super::types::{ChatMessage, TicketContext};

/// The handling category of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    New,
    ThreadReply,
    OrphanThread,
    DeferredFollowup,
    DirectCommand,
    MessageEdited,
    MessageDeleted,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::New => "new",
            Category::ThreadReply => "thread_reply",
            Category::OrphanThread => "orphan_thread",
            Category::DeferredFollowup => "deferred_followup",
            Category::DirectCommand => "direct_command",
            Category::MessageEdited => "message_edited",
            Category::MessageDeleted => "message_deleted",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply in a thread whose ticket is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReply {
    pub message: ChatMessage,
    pub thread_ts: String,
    pub ticket: TicketContext,
    pub is_duplicate: bool,
    pub same_reporter: bool,
}

/// A reply in a thread with no known ticket outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanThread {
    pub message: ChatMessage,
    pub thread_ts: String,
}

/// A reply in a thread whose triage was deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFollowup {
    pub message: ChatMessage,
    pub thread_ts: String,
    pub original_context: String,
    pub original_reporter_id: Option<String>,
}

/// A message that @-mentions the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectCommand {
    pub message: ChatMessage,
    /// Ticket hint resolved from the thread at classification time.
    pub ticket: Option<TicketContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdited {
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user: Option<String>,
    pub previous_text: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDeleted {
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

/// A unit of work, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    New(ChatMessage),
    ThreadReply(ThreadReply),
    OrphanThread(OrphanThread),
    DeferredFollowup(DeferredFollowup),
    DirectCommand(DirectCommand),
    MessageEdited(MessageEdited),
    MessageDeleted(MessageDeleted),
}

impl WorkItem {
    pub fn category(&self) -> Category {
        match self {
            WorkItem::New(_) => Category::New,
            WorkItem::ThreadReply(_) => Category::ThreadReply,
            WorkItem::OrphanThread(_) => Category::OrphanThread,
            WorkItem::DeferredFollowup(_) => Category::DeferredFollowup,
            WorkItem::DirectCommand(_) => Category::DirectCommand,
            WorkItem::MessageEdited(_) => Category::MessageEdited,
            WorkItem::MessageDeleted(_) => Category::MessageDeleted,
        }
    }

    /// Timestamp of the message this item is about.
    pub fn ts(&self) -> &str {
        match self {
            WorkItem::New(message) => &message.ts,
            WorkItem::ThreadReply(reply) => &reply.message.ts,
            WorkItem::OrphanThread(orphan) => &orphan.message.ts,
            WorkItem::DeferredFollowup(followup) => &followup.message.ts,
            WorkItem::DirectCommand(command) => &command.message.ts,
            WorkItem::MessageEdited(edit) => &edit.ts,
            WorkItem::MessageDeleted(delete) => &delete.ts,
        }
    }
}

