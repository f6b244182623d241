//! Core components and types for the intake-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Chat event shapes and cached ticket outcomes.
//! - Normalized work items flowing through the queue.

pub mod config;
pub mod types;
pub mod work;
