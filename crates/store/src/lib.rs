//! Job queue and document storage for the cellcast relay.
//!
//! [`Backend`] is the single handle the rest of the system talks to. On
//! startup it tries the durable Redis backend; if that fails every call is
//! served by the process-local [`MemoryBackend`] instead, transparently to
//! callers. Whether the durable backend is retried later is a
//! [`FallbackPolicy`] choice.

pub mod backend;
pub mod durable;
pub mod error;
pub mod keys;
pub mod memory;
pub mod reconnect;

pub use backend::{Backend, BackendConfig, BackendKind, FallbackPolicy};
pub use durable::RedisBackend;
pub use error::StoreError;
pub use memory::{MemoryBackend, Publication};
