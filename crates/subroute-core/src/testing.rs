//! Test helpers

use crate::message::{ForwardError, ForwardHeaders, InboundMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use subroute_storage::KvStore;

/// Recording [`InboundMessage`] whose deliveries fail per address
pub struct MockMessage {
    recipient: String,
    sender: String,
    headers: HashMap<String, String>,
    failures: HashMap<String, String>,
    forwards: Mutex<Vec<(String, ForwardHeaders)>>,
    rejections: Mutex<Vec<String>>,
}

impl MockMessage {
    pub fn new(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            sender: "sender@example.org".to_string(),
            headers: HashMap::from([("message-id".to_string(), "<test@example.org>".to_string())]),
            failures: HashMap::new(),
            forwards: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
        }
    }

    /// Make delivery to `address` fail with `message`
    pub fn failing(mut self, address: &str, message: &str) -> Self {
        self.failures
            .insert(address.to_string(), message.to_string());
        self
    }

    pub fn forwards(&self) -> Vec<(String, ForwardHeaders)> {
        self.forwards.lock().unwrap().clone()
    }

    pub fn forwarded_to(&self) -> Vec<String> {
        self.forwards().into_iter().map(|(address, _)| address).collect()
    }

    pub fn rejections(&self) -> Vec<String> {
        self.rejections.lock().unwrap().clone()
    }
}

#[async_trait]
impl InboundMessage for MockMessage {
    fn recipient(&self) -> &str {
        &self.recipient
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn raw_size(&self) -> usize {
        1024
    }

    async fn forward(&self, address: &str, headers: &ForwardHeaders) -> Result<(), ForwardError> {
        self.forwards
            .lock()
            .unwrap()
            .push((address.to_string(), headers.clone()));

        match self.failures.get(address) {
            Some(message) => Err(ForwardError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn reject(&self, reason: &str) {
        self.rejections.lock().unwrap().push(reason.to_string());
    }
}

/// Store whose every read fails
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> subroute_common::Result<Option<String>> {
        Err(subroute_common::Error::Storage("locked".to_string()))
    }
}
