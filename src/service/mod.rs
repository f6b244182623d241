//! Service integrations for external APIs and clients.
//!
//! This module contains the seams to the intake-bot's collaborators:
//! - Chat services (e.g., Slack)
//! - The triager that makes the create / update / skip decision
//! - Issue trackers (e.g., Linear)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod tracker;
pub mod triager;
