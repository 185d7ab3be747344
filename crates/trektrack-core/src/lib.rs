//! Trektrack Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Operation`, `MetadataRecord`, `FieldConflict`, `CapabilitySnapshot`
//! - **Port definitions** - Traits for adapters: `IMetadataFetcher`, `IDurableStore`,
//!   `INotificationService`, `IBackgroundHost`
//! - **Configuration** - Typed YAML configuration with validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data and state transitions with no I/O.
//! Ports define trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
