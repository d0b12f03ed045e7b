//! Sending pipeline results by email.

use std::sync::Mutex;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::MailConfig;
use crate::{HelperError, SecretValue, require_env};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), HelperError>;
}

/// SMTP submission over implicit TLS.
pub struct SmtpMailer {
    host: String,
    port: u16,
    sender: String,
    password: SecretValue,
}

impl SmtpMailer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        sender: impl Into<String>,
        password: SecretValue,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            sender: sender.into(),
            password,
        }
    }

    /// Sender address and password come from the environment variables named
    /// in the mail section.
    pub fn from_config(config: &MailConfig) -> Result<Self, HelperError> {
        let sender = require_env(&config.sender_env)?;
        let password = require_env(&config.password_env)?;
        Ok(Self::new(
            config.smtp_host.clone(),
            config.smtp_port,
            sender.expose(),
            password,
        ))
    }

    fn message(&self, mail: &OutgoingMail) -> Result<Message, HelperError> {
        let from: Mailbox = self
            .sender
            .parse()
            .map_err(|err| HelperError::Mail(format!("invalid sender address: {err}")))?;
        let to: Mailbox = mail
            .to
            .trim()
            .parse()
            .map_err(|err| HelperError::Mail(format!("invalid recipient address: {err}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|err| HelperError::Mail(err.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(name = "mail.smtp", skip(self, mail), fields(host = %self.host, subject = %mail.subject))]
    async fn send(&self, mail: OutgoingMail) -> Result<(), HelperError> {
        let message = self.message(&mail)?;
        let credentials = Credentials::new(self.sender.clone(), self.password.expose().to_string());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
            .map_err(|err| HelperError::Mail(err.to_string()))?
            .port(self.port)
            .credentials(credentials)
            .build();

        transport
            .send(message)
            .await
            .map_err(|err| HelperError::Mail(err.to_string()))?;
        info!("email sent");
        Ok(())
    }
}

/// Keeps sent mail in memory instead of delivering it.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), HelperError> {
        self.sent
            .lock()
            .map_err(|_| HelperError::Mail("mailbox poisoned".into()))?
            .push(mail);
        Ok(())
    }
}
