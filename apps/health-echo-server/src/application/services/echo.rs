//! Echo Service
//!
//! Returns whatever message it receives. Used as a connectivity probe for
//! the whole transport pipeline.

/// Opaque echo payload.
pub type EchoMessage = String;

/// Stateless echo service.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl EchoService {
    /// Create a new echo service.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Return the message unchanged.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn echo(&self, message: EchoMessage) -> EchoMessage {
        tracing::trace!(bytes = message.len(), "Echoing message");
        message
    }
}
