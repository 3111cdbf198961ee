//! Outbound email for the Roost gateway.
//!
//! Verification codes go out over SMTP when a relay is configured; without
//! one the code is logged so local setups stay usable.

use anyhow::{Context, Result};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use tracing::info;

use roost_common::config::SmtpConfig;

/// Sends account emails. Object-safe so handlers can hold a trait object and
/// tests can swap in a recording double.
pub trait Mailer: Send + Sync {
    /// Send the signup verification code. Blocking; call from
    /// `spawn_blocking` inside async handlers.
    fn send_verification_code(&self, to: &str, username: &str, code: &str) -> Result<()>;
}

/// SMTP mailer backed by lettre.
pub struct SmtpMailer {
    config: SmtpConfig,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        if config.host.is_none() {
            anyhow::bail!("SMTP host not configured");
        }
        let from = config
            .from
            .clone()
            .or_else(|| config.username.clone())
            .context("SMTP from address not configured")?;
        Ok(Self { config, from })
    }

    fn create_transport(&self) -> Result<SmtpTransport> {
        let host = self.config.host.as_deref().unwrap_or_default();
        let mut builder = SmtpTransport::relay(host)?.port(self.config.port);
        if let (Some(username), Some(password)) =
            (self.config.username.clone(), self.config.password.clone())
        {
            builder = builder.credentials(Credentials::new(username, password));
        }
        Ok(builder.build())
    }
}

impl Mailer for SmtpMailer {
    fn send_verification_code(&self, to: &str, username: &str, code: &str) -> Result<()> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .with_context(|| format!("Invalid from address '{}'", self.from))?,
            )
            .to(to
                .parse()
                .with_context(|| format!("Invalid recipient '{to}'"))?)
            .subject("Your Roost verification code")
            .body(format!(
                "Hi {username},\n\nYour Roost verification code is: {code}\n\n\
                 Enter it to activate your account.\n"
            ))?;

        let transport = self.create_transport()?;
        transport
            .send(&email)
            .with_context(|| format!("SMTP send to {to} failed"))?;
        info!(recipient = %to, "Verification email sent");
        Ok(())
    }
}

/// Mailer used when no SMTP relay is configured. Logs the code instead of
/// sending it.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_verification_code(&self, to: &str, username: &str, code: &str) -> Result<()> {
        info!(
            recipient = %to,
            username = %username,
            code = %code,
            "No SMTP relay configured, verification code logged instead of emailed"
        );
        Ok(())
    }
}

/// Pick the mailer implied by the config: SMTP when a host is set, otherwise
/// the logging fallback.
pub fn mailer_from_config(config: &SmtpConfig) -> Result<Arc<dyn Mailer>> {
    if config.host.is_some() {
        Ok(Arc::new(SmtpMailer::new(config.clone())?))
    } else {
        Ok(Arc::new(LogMailer))
    }
}
