//! In-process relay events for the cellcast server.
//!
//! - [`EventBus`] is the publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RelayEvent`] is the envelope for job completions, stream control
//!   commands and processed-frame notifications.
//! - [`ChannelForwarder`] mirrors every event onto the named channels of
//!   the queue backend so out-of-process subscribers see them too.

pub mod bus;
pub mod forward;

pub use bus::{EventBus, RelayEvent, RelayEventKind};
pub use forward::ChannelForwarder;
