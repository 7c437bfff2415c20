use crate::error::BridgeError;

/// Turns one inbound worker line into an optional reply line.
///
/// Returning an error closes that worker's connection; the listener and
/// other connections are unaffected.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process(&self, message: &str) -> Result<Option<String>, BridgeError>;
}

/// Acknowledges every message by echoing it back with a prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProcessor;

impl MessageProcessor for EchoProcessor {
    fn process(&self, message: &str) -> Result<Option<String>, BridgeError> {
        Ok(Some(format!("Processed worker message: {message}")))
    }
}
