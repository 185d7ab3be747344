//! Integration tests for trektrack-sources
//!
//! Uses wiremock to stand in for the metadata sources and verifies the
//! fetcher end to end: combining sources, status handling, 429 retries
//! and the health probe.

mod common;

mod test_enrich;
mod test_health;
mod test_throttling;
