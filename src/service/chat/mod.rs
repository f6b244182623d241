pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc::UnboundedSender};

use crate::base::types::{ChatEvent, ChatMessage, Res, Void};

// Types.

/// Sink a running listener reports into.
///
/// Carries normalized inbound events plus a signal raised once the listener
/// is subscribed, so history can be scanned without a gap before it.
#[derive(Clone)]
pub struct EventSender {
    events: UnboundedSender<ChatEvent>,
    connected: Arc<Notify>,
}

impl EventSender {
    pub fn new(events: UnboundedSender<ChatEvent>) -> Self {
        Self {
            events,
            connected: Arc::new(Notify::new()),
        }
    }

    /// Forwards one event to the intake pipeline.
    pub fn send(&self, event: ChatEvent) -> Void {
        self.events.send(event).map_err(|_| anyhow::anyhow!("Intake pipeline is closed"))
    }

    /// Called by the listener once it receives realtime events.
    pub fn mark_connected(&self) {
        self.connected.notify_one();
    }

    /// Resolves once the listener has (at some point) reported itself connected.
    pub async fn connected(&self) {
        self.connected.notified().await;
    }
}

/// One page of channel history, newest message first.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    /// Cursor for the next (older) page, if there is one.
    pub next_cursor: Option<String>,
}

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Slack. Implementing this trait allows different chat services to feed
/// the intake pipeline.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    ///
    /// Returns the unique identifier for the bot in the chat platform,
    /// which is used to detect when the bot is mentioned.
    fn bot_user_id(&self) -> &str;

    /// Start the chat client listener.
    ///
    /// Subscribes to realtime events, calls `events.mark_connected()` once
    /// subscribed, and forwards every normalized event into `events`. Runs
    /// until the listener shuts down.
    async fn start(&self, events: EventSender) -> Void;

    /// Fetch one page of channel history no older than `oldest`.
    ///
    /// Pages are returned newest first; pass the returned cursor to get the
    /// next, older page.
    async fn fetch_history(&self, channel_id: &str, oldest: &str, cursor: Option<&str>, limit: u16) -> Res<HistoryPage>;

    /// Fetch every message of a thread, root first.
    async fn fetch_thread(&self, channel_id: &str, thread_ts: &str) -> Res<Vec<ChatMessage>>;

    /// React to a message with an emoji.
    ///
    /// Used to leave the durable "already handled" marker on processed messages.
    async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
