//! In-memory transport for tests and dry runs
//!
//! Only compiled for this crate's own tests or with the `test-util` feature.

use super::message::OutgoingMessage;
use super::transport::{MailTransport, attachment_name};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// A message captured by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Attachment basenames and contents, read at send time
    pub attachments: Vec<(String, Vec<u8>)>,
}

/// Transport that records what would have been sent
///
/// Attachment bytes are captured when `send` is called, since the files themselves
/// are deleted at the end of a run.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sender: String,
    fail_on: Option<usize>,
    panic_on: Option<usize>,
    sent: Mutex<Vec<SentMessage>>,
    attempts: Mutex<usize>,
}

impl RecordingTransport {
    /// Create a transport that accepts everything
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ..Self::default()
        }
    }

    /// Reject the `n`th (1-based) send attempt
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Panic on the `n`th (1-based) send attempt
    pub fn panicking_on(mut self, n: usize) -> Self {
        self.panic_on = Some(n);
        self
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of send attempts, rejected ones included
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            *attempts += 1;
            *attempts
        };

        if self.panic_on == Some(attempt) {
            panic!("transport panicked on attempt {attempt}");
        }
        if self.fail_on == Some(attempt) {
            return Err(Error::Transport(format!(
                "550 message rejected (attempt {attempt})"
            )));
        }

        let mut attachments = Vec::with_capacity(message.attachments.len());
        for path in &message.attachments {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                Error::Transport(format!("failed to read attachment {}: {e}", path.display()))
            })?;
            attachments.push((attachment_name(path), bytes));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                from: message.from.clone(),
                to: message.to.clone(),
                subject: message.subject.clone(),
                body: message.body.clone(),
                attachments,
            });
        Ok(())
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
