//! Inbound message capability
//!
//! The router never owns a message; it drives one through this trait. The
//! transport behind [`InboundMessage::forward`] decides how delivery actually
//! happens and reports failures only by message text.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Extra headers added to a forwarded message
pub type ForwardHeaders = BTreeMap<String, String>;

/// A failed delivery attempt, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ForwardError {
    pub message: String,
}

impl ForwardError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An inbound message being routed
#[async_trait]
pub trait InboundMessage: Send + Sync {
    /// Envelope recipient
    fn recipient(&self) -> &str;

    /// Envelope sender
    fn sender(&self) -> &str;

    /// First value of a header, matched case-insensitively
    fn header(&self, name: &str) -> Option<String>;

    /// Size of the raw message in bytes
    fn raw_size(&self) -> usize;

    /// Deliver a copy of the message to `address` with `headers` added
    async fn forward(&self, address: &str, headers: &ForwardHeaders) -> Result<(), ForwardError>;

    /// Refuse the message with `reason`; called at most once per message
    fn reject(&self, reason: &str);
}
