//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IMetadataFetcher`] - Fetching episode metadata from external sources
//! - [`IDurableStore`] - Key/value persistence for records, progress and conflicts
//! - [`INotificationService`] - User notifications on terminal operation states
//! - [`IBackgroundHost`] - Deferred background execution offered by the host

pub mod background_host;
pub mod durable_store;
pub mod metadata_source;
pub mod notification;

pub use background_host::IBackgroundHost;
pub use durable_store::{keys, IDurableStore};
pub use metadata_source::IMetadataFetcher;
pub use notification::{INotificationService, Notification, NotificationCategory, Urgency};
