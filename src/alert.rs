use crate::model::AlertConfig;
use anyhow::Context;
use chrono::Local;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

/// Outbound notification seam. The monitor only knows this trait; delivery
/// failures are logged at the call site and never fail a tick.
#[async_trait::async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, endpoint: &str, status: &str, issue: &str) -> anyhow::Result<()>;
}

/// Emails failure alerts to a fixed recipient over SMTP.
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &AlertConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .context("Failed to create SMTP transport")?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        let from = config
            .from
            .parse::<Mailbox>()
            .context("Failed to parse sender address")?;
        let to = config
            .to
            .parse::<Mailbox>()
            .context("Failed to parse recipient address")?;

        Ok(Self { transport, from, to })
    }
}

fn alert_body(endpoint: &str, status: &str, issue: &str) -> String {
    format!(
        "API FAILURE ALERT\n\nAPI: {}\nStatus: {}\nIssue: {}\nTime: {}\n",
        endpoint,
        status,
        issue,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

#[async_trait::async_trait]
impl Notify for EmailNotifier {
    async fn notify(&self, endpoint: &str, status: &str, issue: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject("ApiWatch - API Failure Alert")
            .header(ContentType::TEXT_PLAIN)
            .body(alert_body(endpoint, status, issue))
            .context("Failed to build alert message")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send alert email")?;
        tracing::debug!("Alert email sent for {}", endpoint);
        Ok(())
    }
}

/// Stand-in used when alerting is disabled in the config.
pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notify for NoopNotifier {
    async fn notify(&self, endpoint: &str, _status: &str, _issue: &str) -> anyhow::Result<()> {
        tracing::debug!("Alerting disabled, dropping alert for {}", endpoint);
        Ok(())
    }
}

pub fn build_notifier(config: &AlertConfig) -> anyhow::Result<Arc<dyn Notify>> {
    if !config.enabled {
        return Ok(Arc::new(NoopNotifier));
    }
    Ok(Arc::new(EmailNotifier::new(config)?))
}
