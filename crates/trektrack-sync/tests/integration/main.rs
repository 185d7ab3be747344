//! Integration tests for the sync engine
//!
//! The engine runs against scripted collaborators (fetcher, background host,
//! notifier) and an in-memory store. Timer-driven behavior uses paused tokio
//! time.

mod common;
mod test_cancellation;
mod test_conflicts;
mod test_contention;
mod test_dispatch;
mod test_http_pipeline;
mod test_retention;
