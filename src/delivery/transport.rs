//! Mail transports
//!
//! [`MailTransport`] is the seam between the dispatcher and the network. [`SmtpMailer`]
//! submits over an authenticated, encrypted SMTP session.

use super::message::OutgoingMessage;
use crate::config::{SmtpSecurity, TransportConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use tracing::debug;

/// Trait for submitting composed messages
///
/// Implementations must deliver each message fully (all attachments) or return an
/// error; the dispatcher relies on `send` returning only once the server accepted it.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use mailvault::delivery::{MailTransport, OutgoingMessage};
///
/// /// Logs subjects instead of sending anything
/// struct DryRun;
///
/// #[async_trait]
/// impl MailTransport for DryRun {
///     async fn send(&self, message: &OutgoingMessage) -> mailvault::Result<()> {
///         println!("would send {:?} to {}", message.subject, message.to);
///         Ok(())
///     }
///
///     fn sender(&self) -> &str {
///         "backup@example.com"
///     }
///
///     fn name(&self) -> &'static str {
///         "dry-run"
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = DryRun;
/// let message = OutgoingMessage {
///     from: transport.sender().to_string(),
///     to: "ops@example.com".into(),
///     subject: "Docs - 2024-01-01".into(),
///     body: "hello".into(),
///     attachments: vec![],
/// };
/// transport.send(&message).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submit one message
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;

    /// The authenticated sender address, used when a task has no recipient
    fn sender(&self) -> &str;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// SMTP submission via lettre
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
}

impl SmtpMailer {
    /// Build a mailer from transport settings
    ///
    /// No connection is opened here; the first `send` (or [`SmtpMailer::verify`]) does.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let builder = match config.security {
            SmtpSecurity::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            }
        }
        .map_err(|e| Error::Transport(format!("invalid SMTP relay {}: {e}", config.host)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.secret.clone(),
            ))
            .timeout(Some(config.timeout()))
            .build();

        Ok(Self {
            transport,
            sender: config.username.clone(),
        })
    }

    /// Open a session and authenticate without sending anything
    pub async fn verify(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Transport("server did not accept the connection".into())),
            Err(e) => Err(Error::Transport(e.to_string())),
        }
    }

    async fn build(&self, message: &OutgoingMessage) -> Result<Message> {
        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| Error::Transport(format!("invalid sender '{}': {e}", message.from)))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| Error::Transport(format!("invalid recipient '{}': {e}", message.to)))?;

        let octet_stream = ContentType::parse("application/octet-stream")
            .map_err(|e| Error::Transport(format!("invalid content type: {e}")))?;

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
        for path in &message.attachments {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                Error::Transport(format!("failed to read attachment {}: {e}", path.display()))
            })?;
            let attachment =
                Attachment::new(attachment_name(path)).body(bytes, octet_stream.clone());
            parts = parts.singlepart(attachment);
        }

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .multipart(parts)
            .map_err(|e| Error::Transport(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let email = self.build(message).await?;
        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        debug!(
            subject = %message.subject,
            code = %response.code(),
            "message accepted"
        );
        Ok(())
    }

    fn sender(&self) -> &str {
        &self.sender
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Attachment filename: the file's basename
pub fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment.bin".into())
}
