//! Spooled inbound message

use crate::transport::Relay;
use async_trait::async_trait;
use mail_parser::MessageParser;
use std::sync::{Arc, Mutex};
use subroute_core::{ForwardError, ForwardHeaders, InboundMessage};
use tracing::{debug, warn};

/// A message read in full, forwarded through a [`Relay`]
pub struct SpooledMessage {
    sender: String,
    recipient: String,
    raw: Vec<u8>,
    headers: Vec<(String, String)>,
    relay: Arc<dyn Relay>,
    rejection: Mutex<Option<String>>,
}

impl SpooledMessage {
    pub fn new(sender: String, recipient: String, raw: Vec<u8>, relay: Arc<dyn Relay>) -> Self {
        let headers = parse_headers(&raw);

        Self {
            sender,
            recipient,
            raw,
            headers,
            relay,
            rejection: Mutex::new(None),
        }
    }

    /// Reason passed to [`InboundMessage::reject`], if any
    pub fn rejection(&self) -> Option<String> {
        self.rejection
            .lock()
            .ok()
            .and_then(|rejection| rejection.clone())
    }
}

/// Unfolded header fields in message order
fn parse_headers(raw: &[u8]) -> Vec<(String, String)> {
    let Some(message) = MessageParser::default().parse(raw) else {
        warn!("Message could not be parsed, routing without headers");
        return Vec::new();
    };

    message
        .headers()
        .iter()
        .filter_map(|header| {
            let value = raw.get(header.offset_start as usize..header.offset_end as usize)?;
            let value = String::from_utf8_lossy(value)
                .replace("\r\n", "")
                .replace('\n', "");
            Some((header.name().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Prepend `headers` to the raw message
fn with_headers(headers: &ForwardHeaders, raw: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(raw.len() + 64);
    for (name, value) in headers {
        message.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    message.extend_from_slice(raw);
    message
}

#[async_trait]
impl InboundMessage for SpooledMessage {
    fn recipient(&self) -> &str {
        &self.recipient
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn raw_size(&self) -> usize {
        self.raw.len()
    }

    async fn forward(&self, address: &str, headers: &ForwardHeaders) -> Result<(), ForwardError> {
        debug!(address, "Relaying message");
        self.relay
            .send(&self.sender, address, &with_headers(headers, &self.raw))
            .await
    }

    fn reject(&self, reason: &str) {
        match self.rejection.lock() {
            Ok(mut rejection) => {
                if rejection.is_none() {
                    *rejection = Some(reason.to_string());
                }
            }
            Err(e) => warn!(error = %e, "Rejection lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RAW: &[u8] = b"From: Alice <alice@example.org>\r\n\
To: bob+news@example.net\r\n\
Subject: Quarterly\r\n\
 report\r\n\
Message-ID: <1234@example.org>\r\n\
\r\n\
Hello Bob\r\n";

    #[derive(Default)]
    struct RecordingRelay {
        sent: Mutex<Vec<(String, String, Vec<u8>)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Relay for RecordingRelay {
        async fn send(&self, sender: &str, recipient: &str, raw: &[u8]) -> Result<(), ForwardError> {
            self.sent
                .lock()
                .unwrap()
                .push((sender.to_string(), recipient.to_string(), raw.to_vec()));
            match &self.fail_with {
                Some(message) => Err(ForwardError::new(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn message(relay: Arc<RecordingRelay>) -> SpooledMessage {
        SpooledMessage::new(
            "alice@example.org".to_string(),
            "bob+news@example.net".to_string(),
            RAW.to_vec(),
            relay,
        )
    }

    #[test]
    fn test_headers() {
        let message = message(Arc::new(RecordingRelay::default()));

        assert_eq!(message.header("message-id").as_deref(), Some("<1234@example.org>"));
        assert_eq!(message.header("Subject").as_deref(), Some("Quarterly report"));
        assert_eq!(message.header("X-Missing"), None);
        assert_eq!(message.raw_size(), RAW.len());
    }

    #[tokio::test]
    async fn test_forward_prepends_headers() {
        let relay = Arc::new(RecordingRelay::default());
        let message = message(relay.clone());
        let headers = ForwardHeaders::from([("X-Subroute".to_string(), "PASS".to_string())]);

        message.forward("bob@home.net", &headers).await.unwrap();

        let sent = relay.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice@example.org");
        assert_eq!(sent[0].1, "bob@home.net");
        assert!(sent[0].2.starts_with(b"X-Subroute: PASS\r\nFrom: Alice"));
        assert!(sent[0].2.ends_with(b"Hello Bob\r\n"));
    }

    #[tokio::test]
    async fn test_forward_failure() {
        let relay = Arc::new(RecordingRelay {
            fail_with: Some("transient error (421): try later".to_string()),
            ..RecordingRelay::default()
        });
        let message = message(relay);

        let err = message
            .forward("bob@home.net", &ForwardHeaders::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "transient error (421): try later");
    }

    #[test]
    fn test_reject_keeps_first_reason() {
        let message = message(Arc::new(RecordingRelay::default()));
        assert_eq!(message.rejection(), None);

        message.reject("bob+news: gone");
        message.reject("later");
        assert_eq!(message.rejection().as_deref(), Some("bob+news: gone"));
    }
}
