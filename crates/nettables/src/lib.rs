//! # nettables
//!
//! Replicated key/value tables for robot telemetry and control, speaking the
//! NetworkTables 2.0 protocol.
//!
//! ## Overview
//!
//! A server holds the authoritative table; clients hold copies that stay in
//! step with it. Every entry has a name, a type fixed on first write, a value
//! and a 16-bit sequence number that orders concurrent writes.
//!
//! - **Writes are local first**: they apply to the local store immediately
//!   and are flushed to peers on a fixed interval.
//! - **Network faults never surface as errors**: the client reconnects by
//!   itself and re-offers entries the server doesn't know yet. Watch
//!   [`ConnectionEvent`]s to see it happen.
//! - **Protocol faults are terminal**: a bad message or a version mismatch
//!   leaves the client closed until it is told to reconnect.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nettables::{ClientConfig, NetworkTableClient, NetworkTableNode};
//!
//! async fn example() {
//!     let client = NetworkTableClient::connect(ClientConfig::default().with_host("10.0.0.2")).await;
//!     let dashboard = client.table("SmartDashboard");
//!     dashboard.put_number("speed", 1.5);
//!     if !dashboard.put_string("speed", "fast") {
//!         // "speed" is already a number
//!     }
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `nettables::core` - entries, values and the value codec
//! - `nettables::store` - entry stores, listeners and persistence
//! - `nettables::sync` - wire protocol, connections and the write loop

pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod server;
pub mod table;

pub use nettables_core as core;
pub use nettables_store as store;
pub use nettables_sync as sync;

pub use client::NetworkTableClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{NtError, Result};
pub use node::NetworkTableNode;
pub use server::NetworkTableServer;
pub use table::{NetworkTable, PATH_SEPARATOR};

pub use nettables_core::{EntryFlags, EntryType, Value};
pub use nettables_store::{ConnectionEvent, ListenerHandle, NotifyFlags};
pub use nettables_sync::{ClientConnectionState, DEFAULT_PORT, PROTOCOL_REVISION};
