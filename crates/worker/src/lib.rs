//! Line-protocol bridge to external compute workers.
//!
//! Workers connect over plain TCP and exchange newline-delimited UTF-8
//! messages. Each inbound line is handed to a [`MessageProcessor`]; a
//! non-empty reply is written back on the same connection.

pub mod bridge;
pub mod error;
pub mod processor;

pub use bridge::{BridgeHandle, WorkerBridge, MAX_LINE_LENGTH};
pub use error::BridgeError;
pub use processor::{EchoProcessor, MessageProcessor};
