//! Event handling for intake-bot.
//!
//! This module holds the correlation-and-dispatch core:
//! - Filtering and classifying incoming chat events
//! - The single-flight queue in front of the triager
//! - Dispatching work and folding verdicts back into the correlation store
//! - Recovering missed messages from channel history at startup

pub mod classifier;
pub mod dispatcher;
pub mod filter;
pub mod intake;
pub mod queue;
pub mod recovery;
