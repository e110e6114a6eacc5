use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::MailConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let host = cfg.server.as_deref().context("MAIL_SERVER is not set")?;
        let builder = if cfg.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("smtp starttls relay")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).context("smtp relay")?
        };
        let transport = builder
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        let from = format!("{} <{}>", cfg.from_name, cfg.from)
            .parse::<Mailbox>()
            .context("parse MAIL_FROM")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>().context("parse recipient")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build email")?;
        self.transport.send(message).await.context("smtp send")?;
        tracing::info!(to = %to, subject = %subject, "email sent");
        Ok(())
    }
}

/// Used when no SMTP server is configured; writes the message to the log.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, subject = %subject, body = %body, "email (log mailer)");
        Ok(())
    }
}

pub fn verification_email(base_url: &str, token: &str) -> (String, String) {
    let link = format!("{}/api/v1/auth/verify-email/{}", base_url.trim_end_matches('/'), token);
    (
        "Confirm your email".to_string(),
        format!("Welcome!\n\nPlease confirm your email address by opening this link:\n\n{link}\n"),
    )
}

pub fn password_reset_email(base_url: &str, token: &str) -> (String, String) {
    let link = format!("{}/api/v1/auth/reset-password/{}", base_url.trim_end_matches('/'), token);
    (
        "Reset your password".to_string(),
        format!(
            "A password reset was requested for your account.\n\n\
             Submit your new password to:\n\n{link}\n\n\
             If you did not request this, ignore this email."
        ),
    )
}
