//! Outbound SMTP relay

use async_trait::async_trait;
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;
use subroute_common::config::{TransportConfig, TransportSecurity};
use subroute_core::ForwardError;
use tracing::debug;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends an already serialized message to one recipient
#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, sender: &str, recipient: &str, raw: &[u8]) -> Result<(), ForwardError>;
}

/// Relay through a configured SMTP server
pub struct SmtpRelay {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    envelope_from: Option<String>,
}

impl SmtpRelay {
    pub fn from_config(config: &TransportConfig) -> subroute_common::Result<Self> {
        let builder = match config.security {
            TransportSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
            TransportSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            }
            TransportSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.host,
            )),
        }
        .map_err(|e| {
            subroute_common::Error::Config(format!("Invalid relay '{}': {}", config.host, e))
        })?;

        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.timeout(Some(SEND_TIMEOUT)).build(),
            envelope_from: config.envelope_from.clone(),
        })
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn send(&self, sender: &str, recipient: &str, raw: &[u8]) -> Result<(), ForwardError> {
        let sender = self.envelope_from.as_deref().unwrap_or(sender);
        let envelope = envelope(sender, recipient)?;

        let response = self
            .mailer
            .send_raw(&envelope, raw)
            .await
            .map_err(|e| ForwardError::new(e.to_string()))?;

        debug!(recipient, code = %response.code(), "Relay accepted message");
        Ok(())
    }
}

/// Build the SMTP envelope; an empty or `<>` sender is the null reverse path
fn envelope(sender: &str, recipient: &str) -> Result<Envelope, ForwardError> {
    let sender = sender.trim_matches(|c| c == '<' || c == '>');
    let from = if sender.is_empty() {
        None
    } else {
        Some(parse_address(sender)?)
    };

    Envelope::new(from, vec![parse_address(recipient)?])
        .map_err(|e| ForwardError::new(format!("Invalid envelope: {}", e)))
}

fn parse_address(address: &str) -> Result<Address, ForwardError> {
    address
        .parse()
        .map_err(|e| ForwardError::new(format!("Invalid address '{}': {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope() {
        let envelope = envelope("alice@example.org", "bob@example.net").unwrap();
        assert_eq!(
            envelope.from().map(|a| a.to_string()).as_deref(),
            Some("alice@example.org")
        );
        assert_eq!(envelope.to().len(), 1);
    }

    #[test]
    fn test_null_sender() {
        assert!(envelope("<>", "bob@example.net").unwrap().from().is_none());
        assert!(envelope("", "bob@example.net").unwrap().from().is_none());
    }

    #[test]
    fn test_invalid_recipient() {
        let err = envelope("alice@example.org", "not an address").unwrap_err();
        assert!(err.message.contains("not an address"));
    }

    #[test]
    fn test_from_config() {
        let config = TransportConfig {
            port: 2525,
            username: Some("relay".to_string()),
            password: Some("secret".to_string()),
            envelope_from: Some("bounces@example.org".to_string()),
            ..TransportConfig::default()
        };
        let relay = SmtpRelay::from_config(&config).unwrap();
        assert_eq!(relay.envelope_from.as_deref(), Some("bounces@example.org"));
    }
}
