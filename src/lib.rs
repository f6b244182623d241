//! Library root for `intake-bot`.
//!
//! Intake-bot watches a single Slack channel and hands its traffic to an
//! external triager that files, updates or skips tracker tickets:
//! - Classifies new messages, thread replies, edits, deletions and @-mentions
//! - Correlates threads and messages with the tickets they produced
//! - Serializes every triager call through a single-flight queue
//! - Recovers messages missed while offline from channel history
//!
//! The chat platform, triager and tracker sit behind traits so each can be
//! swapped or mocked independently.

pub mod base;
pub mod interaction;
pub mod runtime;
pub mod service;
pub mod state;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::{debug, info};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the intake-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with chat, triager and tracker clients
/// - Starts the intake pipeline and the chat listener
pub async fn start(config: Config) -> Void {
    info!("Starting intake-bot ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        debug!("A crypto provider was already installed.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
