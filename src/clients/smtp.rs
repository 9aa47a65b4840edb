use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{
    clients::dispatcher::Mailer,
    config::Config,
    error::EmailError,
    models::delivery::{DeliveryResult, OutgoingEmail},
};

const PROVIDER: &str = "smtp";

/// SMTP delivery provider backed by lettre's async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn new(config: &Config) -> Result<Self, EmailError> {
        let builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| EmailError::provider(PROVIDER, e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            "SMTP mailer initialized"
        );

        Ok(Self {
            transport,
            from_email: config.smtp_from_email.clone(),
            from_name: config.smtp_from_name.clone(),
        })
    }

    fn mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, EmailError> {
        let address = address
            .parse()
            .map_err(|e| EmailError::Validation(format!("Invalid email address: {}", e)))?;

        Ok(Mailbox::new(name.map(|n| n.to_string()), address))
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, EmailError> {
        let overrides = &email.overrides;

        let from_email = overrides.from_email.as_deref().unwrap_or(&self.from_email);
        let from_name = overrides.from_name.as_deref().unwrap_or(&self.from_name);

        let mut builder = Message::builder()
            .from(Self::mailbox(from_email, Some(from_name))?)
            .to(Self::mailbox(&email.to, email.recipient_name.as_deref())?)
            .subject(email.subject.as_str());

        if let Some(reply_to) = &overrides.reply_to {
            builder = builder.reply_to(Self::mailbox(reply_to, None)?);
        }

        for cc in overrides.cc.iter().flatten() {
            builder = builder.cc(Self::mailbox(cc, None)?);
        }

        for bcc in overrides.bcc.iter().flatten() {
            builder = builder.bcc(Self::mailbox(bcc, None)?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| EmailError::provider(PROVIDER, e))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryResult, EmailError> {
        let message = self.build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::provider(PROVIDER, e))?;

        debug!(to = %email.to, "Email sent via SMTP");

        Ok(DeliveryResult {
            provider: PROVIDER.to_string(),
            provider_message_id: None,
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
