//! In-process correlation state owned by the intake pipeline.
//!
//! - Thread and message ticket outcomes with lazy TTL expiry.
//! - The bounded, insertion-ordered set of already-queued messages.

pub mod correlation;
pub mod dedup;

pub use correlation::CorrelationStore;
