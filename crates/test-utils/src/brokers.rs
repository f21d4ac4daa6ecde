//! In-process brokers for delivery tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use publisher::{Broker, PublishError};

/// A message as seen by a test broker.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// The `id` field of the JSON payload.
    pub fn notification_id(&self) -> Option<String> {
        let text = std::str::from_utf8(&self.payload).ok()?;
        let start = text.find("\"id\":\"")? + 6;
        let end = text[start..].find('"')? + start;
        Some(text[start..end].to_string())
    }
}

/// Acknowledges everything and remembers what it saw, optionally after a
/// delay per publish.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<PublishedMessage>>,
    delay: Option<Duration>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Scripted broker response.
#[derive(Debug, Clone)]
pub enum Reply {
    Ack,
    Nack,
    Reject,
    /// Never answer, so the publisher's timeout fires
    Hang,
}

/// Plays back a script of replies, then acknowledges. Every attempt is
/// recorded; only acknowledged ones count as delivered.
#[derive(Debug, Default)]
pub struct ScriptedBroker {
    script: Mutex<VecDeque<Reply>>,
    attempts: Mutex<Vec<PublishedMessage>>,
    delivered: Mutex<Vec<PublishedMessage>>,
}

impl ScriptedBroker {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<PublishedMessage> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<PublishedMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        self.attempts.lock().unwrap().push(message.clone());

        let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Ack);
        match reply {
            Reply::Ack => {
                self.delivered.lock().unwrap().push(message);
                Ok(())
            }
            Reply::Nack => Err(PublishError::Transient("nack".to_string())),
            Reply::Reject => Err(PublishError::Rejected("rejected by broker".to_string())),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
