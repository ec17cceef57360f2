//! # nettables sync
//!
//! Wire protocol, connection handling and the periodic write loop that keep a
//! client's table in step with its server.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                  Server
//!   |-------- ClientHello(0x0200) -------->|
//!   |<------- EntryAssignment * n ---------|   full snapshot
//!   |<------- ServerHelloComplete ---------|
//!   |-------- EntryAssignment * m -------->|   client-only entries
//!   |                                      |
//!   |<======= EntryAssignment/Update =====>|   every write interval
//!   |-------- KeepAlive ------------------>|
//! ```
//!
//! ## Pieces
//!
//! - [`messages`]: the six message kinds and their framing
//! - [`connection`]: a split stream, buffered writer plus message reader
//! - [`adapter`]: the client side state machine, with reconnects
//! - [`server`]: per-client adapters and the broadcast list
//! - [`write_manager`]: batches store changes and flushes them on a timer
//! - [`transport`]: TCP and in-memory streams

pub mod adapter;
pub mod connection;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod server;
pub mod state;
pub mod transport;
pub mod write_manager;

pub use adapter::ClientConnectionAdapter;
pub use connection::{Connection, MessageReader};
pub use convergence::{table_digest, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use messages::{decode, Message, DEFAULT_PORT, PROTOCOL_REVISION};
pub use server::{ServerConnectionAdapter, ServerConnectionList};
pub use state::{ClientConnectionState, ServerConnectionState};
pub use transport::{
    memory::{MemoryListener, MemoryStreamFactory},
    BoxedStream, DuplexStream, StreamAcceptor, StreamFactory, TcpAcceptor, TcpStreamFactory,
};
pub use write_manager::{OutgoingTarget, WriteManager, WriteManagerConfig};
