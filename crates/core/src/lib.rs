//! Shared domain types for the cellcast relay.
//!
//! Everything here is free of I/O: job and stream records, the validated
//! submission documents accepted at the HTTP boundary, the mode parameter
//! catalog, and the message-type constants used on client WebSockets.

pub mod error;
pub mod job;
pub mod messages;
pub mod parameters;
pub mod stream;
pub mod submission;
pub mod types;
