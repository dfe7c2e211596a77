use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::MailConfig;
use crate::models::{Event, Ticket};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig, host: &str) -> Result<Self, NotifyError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| NotifyError::Address(config.from.clone()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotifyError::Transport(format!("Failed to create SMTP transport: {}", e)))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|_| NotifyError::Address(mail.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

/// Used when no SMTP host is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.body, "Mail (SMTP not configured)");
        Ok(())
    }
}

pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn Mailer>, NotifyError> {
    match &config.smtp_host {
        Some(host) => {
            info!(host = %host, port = config.smtp_port, "Mail: sending through SMTP");
            Ok(Arc::new(SmtpMailer::from_config(config, host)?))
        }
        None => {
            warn!("Mail: SMTP_HOST not set, outgoing mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Formats user-facing messages and delivers them through a [`Mailer`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    app_url: String,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, app_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            mailer,
            retry,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn send_ticket(
        &self,
        email: &str,
        ticket: &Ticket,
        event: &Event,
    ) -> Result<(), NotifyError> {
        let mail = OutgoingMail {
            to: email.to_string(),
            subject: format!("Your ticket for {}", event.title),
            body: format!(
                "You're registered for {title}.\n\n\
                 Ticket number: {number}\n\
                 When: {date} {time}\n\
                 Where: {location}\n\
                 Price: {price}\n\n\
                 Show this QR payload at the entrance:\n{qr}\n\n\
                 Manage your tickets at {url}/tickets",
                title = event.title,
                number = ticket.ticket_number,
                date = event.date.format("%Y-%m-%d"),
                time = event.time,
                location = event.location,
                price = ticket.price,
                qr = ticket.qr_payload,
                url = self.app_url,
            ),
        };
        self.deliver(&mail, &ticket.ticket_number).await
    }

    pub async fn send_reminder(
        &self,
        email: &str,
        event: &Event,
        ticket_number: &str,
    ) -> Result<(), NotifyError> {
        let mail = OutgoingMail {
            to: email.to_string(),
            subject: format!("Reminder: {} is coming up", event.title),
            body: format!(
                "{title} starts on {date} {time} at {location}.\n\n\
                 Bring ticket {number}.",
                title = event.title,
                date = event.date.format("%Y-%m-%d"),
                time = event.time,
                location = event.location,
                number = ticket_number,
            ),
        };
        self.deliver(&mail, ticket_number).await
    }

    pub async fn send_password_reset(
        &self,
        email: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let mail = OutgoingMail {
            to: email.to_string(),
            subject: "Reset your EventSphere password".to_string(),
            body: format!(
                "Someone asked to reset the password for this account.\n\n\
                 Open {url}/reset-password/{token} before {expires} to choose a new one.\n\n\
                 If this wasn't you, ignore this message.",
                url = self.app_url,
                token = token,
                expires = expires_at.format("%Y-%m-%d %H:%M UTC"),
            ),
        };
        self.deliver(&mail, "password-reset").await
    }

    /// Sends the ticket mail in the background. The returned handle is only
    /// useful to tests; failures are logged, not returned.
    pub fn dispatch_ticket(&self, email: String, ticket: Ticket, event: Event) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send_ticket(&email, &ticket, &event).await {
                error!(
                    ticket_number = %ticket.ticket_number,
                    to = %email,
                    error = %e,
                    "Ticket notification failed"
                );
            }
        })
    }

    pub fn dispatch_password_reset(
        &self,
        email: String,
        token: String,
        expires_at: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.send_password_reset(&email, &token, expires_at).await {
                error!(to = %email, error = %e, "Password reset notification failed");
            }
        })
    }

    async fn deliver(&self, mail: &OutgoingMail, reference: &str) -> Result<(), NotifyError> {
        let attempts = self.retry.attempts.max(1);
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.mailer.send(mail).await {
                Ok(()) => {
                    info!(to = %mail.to, reference, attempt, "Notification sent");
                    return Ok(());
                }
                // Bad addresses will not fix themselves.
                Err(e @ NotifyError::Address(_)) => return Err(e),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(to = %mail.to, reference, attempt, error = %e, "Notification attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }
}
