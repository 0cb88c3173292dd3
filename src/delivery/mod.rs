//! Batched delivery
//!
//! Files are grouped into size-bounded batches ([`batching`]), each batch becomes one
//! message ([`message`]), and messages go out strictly in batch order through a
//! [`MailTransport`]. The first failure stops the run: later batches are not attempted.

pub mod batching;
pub mod message;
#[cfg(any(test, feature = "test-util"))]
mod recording;
mod transport;

pub use batching::{partition, plan_batches};
pub use message::OutgoingMessage;
#[cfg(any(test, feature = "test-util"))]
pub use recording::{RecordingTransport, SentMessage};
pub use transport::{MailTransport, SmtpMailer, attachment_name};

use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::types::{Batch, Event};
use chrono::Local;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Sends batches as sequenced messages
pub struct Dispatcher<'a> {
    transport: &'a dyn MailTransport,
    event_tx: Option<&'a broadcast::Sender<Event>>,
    host: String,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher over `transport`
    pub fn new(transport: &'a dyn MailTransport) -> Self {
        Self {
            transport,
            event_tx: None,
            host: crate::utils::host_name(),
        }
    }

    /// Publish a `BatchSent` event after each accepted message
    pub fn with_events(mut self, event_tx: &'a broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Override the host identifier written into message bodies
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Send every batch in order, one message each
    ///
    /// Returns the number of messages sent. A rejected batch fails the whole call with
    /// [`Error::DeliveryFailed`] naming its position.
    pub async fn dispatch(&self, task: &TaskConfig, batches: &[Batch]) -> Result<usize> {
        let total = batches.len();
        let now = Local::now();
        let to = task
            .effective_recipient()
            .unwrap_or_else(|| self.transport.sender())
            .to_string();

        for (position, batch) in batches.iter().enumerate() {
            let index = position + 1;
            let outgoing = OutgoingMessage {
                from: self.transport.sender().to_string(),
                to: to.clone(),
                subject: message::subject(&task.subject, index, total, now),
                body: message::body(&task.name, &self.host, now, index, total),
                attachments: batch.files.clone(),
            };

            if let Err(e) = self.transport.send(&outgoing).await {
                error!(
                    task = %task.name,
                    batch = index,
                    total,
                    transport = self.transport.name(),
                    error = %e,
                    "batch delivery failed"
                );
                return Err(Error::DeliveryFailed {
                    batch: index,
                    total,
                    reason: match e {
                        Error::Transport(reason) => reason,
                        other => other.to_string(),
                    },
                });
            }

            info!(
                task = %task.name,
                batch = index,
                total,
                files = batch.len(),
                bytes = batch.total_bytes,
                "batch sent"
            );
            if let Some(tx) = self.event_tx {
                tx.send(Event::BatchSent {
                    task: task.name.clone(),
                    batch: index,
                    total,
                })
                .ok();
            }
        }

        Ok(total)
    }
}
