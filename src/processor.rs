use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    clients::{
        database::RecordStore,
        dispatcher::DeliveryDispatcher,
        rbmq::{RabbitMqClient, StatusPublisher},
        template::TemplateServiceClient,
        user::UserServiceClient,
    },
    config::RecipientSource,
    error::EmailError,
    models::{
        delivery::{OutgoingEmail, SenderOverrides},
        message::{EmailNotificationRequest, NotificationType},
        record::{EmailRecord, EmailStatus, NewEmailRecord, StatusUpdate},
        retry::RetryConfig,
    },
    utils::retry_with_backoff,
};

/// Recipient data for one request, either carried in the inbound metadata or
/// resolved through the user service.
struct ResolvedRecipient {
    email: String,
    name: Option<String>,
    language: String,
}

/// End-to-end pipeline orchestrator: idempotent admission, recipient and
/// template resolution, provider dispatch, record updates, and status events.
pub struct NotificationProcessor {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn StatusPublisher>,
    template_client: Arc<TemplateServiceClient>,
    dispatcher: Arc<DeliveryDispatcher>,
    user_client: Option<Arc<UserServiceClient>>,
    retry_config: RetryConfig,
    recipient_source: RecipientSource,
}

impl NotificationProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn StatusPublisher>,
        template_client: Arc<TemplateServiceClient>,
        dispatcher: Arc<DeliveryDispatcher>,
        user_client: Option<Arc<UserServiceClient>>,
        retry_config: RetryConfig,
        recipient_source: RecipientSource,
    ) -> Self {
        Self {
            store,
            publisher,
            template_client,
            dispatcher,
            user_client,
            retry_config,
            recipient_source,
        }
    }

    /// Processes one notification request to a terminal record.
    ///
    /// A duplicate `request_id` short-circuits to the existing record without
    /// a second dispatch. Pipeline failures after admission are recorded as
    /// FAILED on the record and returned as `Ok`; an `Err` here means the
    /// request never reached a record (invalid payload or storage failure)
    /// and is dead-lettered by the queue worker.
    pub async fn process_notification(
        &self,
        request: EmailNotificationRequest,
    ) -> Result<EmailRecord, EmailError> {
        info!(
            request_id = %request.request_id,
            notification_id = %request.notification_id,
            user_id = %request.user_id,
            "Processing notification request"
        );

        self.validate(&request)?;

        let overrides = SenderOverrides::from_request(&request);
        let mut metadata = overrides.to_metadata(&request.language());
        metadata["variables"] = json!(request.variables);

        let (record, is_duplicate) = self
            .store
            .admit(NewEmailRecord {
                notification_id: request.notification_id.clone(),
                request_id: request.request_id.clone(),
                correlation_id: request.correlation_id.clone(),
                user_id: request.user_id.clone(),
                template_code: request.template_code.clone(),
                recipient_email: request.metadata_str("recipient_email").unwrap_or_default(),
                recipient_name: request.metadata_str("recipient_name"),
                priority: request.priority,
                metadata,
            })
            .await?;

        if is_duplicate {
            info!(
                request_id = %request.request_id,
                "Duplicate request_id, skipping"
            );
            return Ok(record);
        }

        match self.send_pipeline(&record, &request, overrides).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Notification failed"
                );
                let record = self
                    .store
                    .update_status(record.id, EmailStatus::Failed, StatusUpdate::with_error(&e))
                    .await?;
                Ok(record)
            }
        }
    }

    async fn send_pipeline(
        &self,
        record: &EmailRecord,
        request: &EmailNotificationRequest,
        overrides: SenderOverrides,
    ) -> Result<EmailRecord, EmailError> {
        let correlation_id = request.correlation_id.as_deref();

        let recipient = match self.resolve_recipient(request).await? {
            Some(recipient) => recipient,
            None => {
                // Preference denial is terminal: recorded, never retried.
                let record = self
                    .store
                    .update_status(
                        record.id,
                        EmailStatus::Failed,
                        StatusUpdate::with_error("email notifications disabled"),
                    )
                    .await?;
                info!(
                    request_id = %request.request_id,
                    user_id = %request.user_id,
                    "Recipient has email notifications disabled, skipping"
                );
                return Ok(record);
            }
        };

        if record.recipient_email.is_empty() {
            self.store
                .set_recipient(record.id, &recipient.email, recipient.name.as_deref())
                .await?;
        }

        self.store
            .update_status(record.id, EmailStatus::Sending, StatusUpdate::default())
            .await?;

        self.publisher
            .publish_status(
                &request.notification_id,
                EmailStatus::Sending,
                correlation_id,
                json!({}),
            )
            .await?;

        let rendered = self
            .template_client
            .render_email_template(
                &request.template_code,
                &request.variables,
                &recipient.language,
                correlation_id,
            )
            .await?;

        self.store
            .set_content(record.id, &rendered.subject, &rendered.body_html)
            .await?;

        let outgoing = OutgoingEmail {
            to: recipient.email,
            recipient_name: recipient.name,
            subject: rendered.subject,
            html_body: rendered.body_html,
            overrides,
        };

        // Provider errors are retryable here, at the orchestrator level; the
        // dispatcher itself never retries. An open provider circuit aborts the
        // loop on its first denial.
        let result = retry_with_backoff(&self.retry_config, || self.dispatcher.send(&outgoing))
            .await?;

        let record = self
            .store
            .update_status(
                record.id,
                EmailStatus::Sent,
                StatusUpdate::with_provider(&result.provider, result.provider_message_id.clone()),
            )
            .await?;

        // The email is out; a failed status event must not flip the record
        // back to FAILED, or a resubmission would dispatch a second copy.
        if let Err(e) = self
            .publisher
            .publish_status(
                &request.notification_id,
                EmailStatus::Sent,
                correlation_id,
                json!({ "provider": result.provider }),
            )
            .await
        {
            warn!(
                notification_id = %request.notification_id,
                error = %e,
                "Failed to publish sent status event"
            );
        }

        info!(
            request_id = %request.request_id,
            notification_id = %request.notification_id,
            provider = %result.provider,
            "Email sent successfully"
        );

        Ok(record)
    }

    /// Resolves the recipient for a request. Returns `None` when the user's
    /// preferences deny the email channel.
    async fn resolve_recipient(
        &self,
        request: &EmailNotificationRequest,
    ) -> Result<Option<ResolvedRecipient>, EmailError> {
        // Requests that already carry recipient metadata (direct-API intake)
        // skip the user service entirely.
        if let Some(email) = request.metadata_str("recipient_email") {
            return Ok(Some(ResolvedRecipient {
                email,
                name: request.metadata_str("recipient_name"),
                language: request.language(),
            }));
        }

        match self.recipient_source {
            RecipientSource::Metadata => Err(EmailError::Validation(
                "recipient_email is required in metadata".to_string(),
            )),
            RecipientSource::UserService => {
                let user_client = self.user_client.as_ref().ok_or_else(|| {
                    EmailError::Validation("user service client not configured".to_string())
                })?;

                let profile = user_client
                    .fetch_user(&request.user_id, request.correlation_id.as_deref())
                    .await?;

                if !profile.email_enabled {
                    return Ok(None);
                }

                Ok(Some(ResolvedRecipient {
                    email: profile.email,
                    name: Some(profile.name),
                    language: profile.language,
                }))
            }
        }
    }

    /// Rebuilds a FAILED or BOUNCED record as a fresh request with a derived
    /// `request_id`. The prior record is left untouched.
    pub async fn resubmit(&self, notification_id: &str) -> Result<EmailRecord, EmailError> {
        let record = self
            .store
            .find_by_notification_id(notification_id)
            .await?
            .ok_or_else(|| EmailError::NotFound {
                resource: format!("notification {}", notification_id),
            })?;

        if !matches!(record.status, EmailStatus::Failed | EmailStatus::Bounced) {
            return Err(EmailError::Validation(format!(
                "Cannot retry email with status: {}",
                record.status
            )));
        }

        let overrides = SenderOverrides::from_metadata(&record.metadata);
        let language = record
            .metadata
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
            .to_string();
        let variables = record
            .metadata
            .get("variables")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let mut metadata = serde_json::Map::new();
        if !record.recipient_email.is_empty() {
            metadata.insert("recipient_email".to_string(), json!(record.recipient_email));
        }
        if let Some(name) = &record.recipient_name {
            metadata.insert("recipient_name".to_string(), json!(name));
        }
        metadata.insert("language".to_string(), json!(language));
        for (key, value) in overrides
            .to_metadata(&language)
            .as_object()
            .into_iter()
            .flatten()
        {
            metadata.entry(key.clone()).or_insert(value.clone());
        }

        let request = EmailNotificationRequest {
            notification_id: record.notification_id.clone(),
            notification_type: NotificationType::Email,
            user_id: record.user_id.clone(),
            template_code: record.template_code.clone(),
            variables,
            request_id: derived_request_id(&record.request_id),
            priority: record.priority,
            metadata: metadata.into_iter().collect(),
            correlation_id: record.correlation_id.clone(),
        };

        info!(
            notification_id,
            request_id = %request.request_id,
            "Resubmitting failed notification"
        );

        self.process_notification(request).await
    }

    pub async fn find_record(
        &self,
        notification_id: &str,
    ) -> Result<Option<EmailRecord>, EmailError> {
        self.store.find_by_notification_id(notification_id).await
    }

    fn validate(&self, request: &EmailNotificationRequest) -> Result<(), EmailError> {
        if request.notification_type != NotificationType::Email {
            return Err(EmailError::Validation(format!(
                "Unsupported notification type: {:?}",
                request.notification_type
            )));
        }

        if request.request_id.is_empty() {
            return Err(EmailError::Validation(
                "request_id must not be empty".to_string(),
            ));
        }

        if !(1..=10).contains(&request.priority) {
            return Err(EmailError::Validation(format!(
                "priority must be between 1 and 10, got {}",
                request.priority
            )));
        }

        Ok(())
    }
}

/// Next idempotency key in a resubmission chain: `r1` becomes `r1_retry_1`,
/// `r1_retry_1` becomes `r1_retry_2`.
fn derived_request_id(request_id: &str) -> String {
    if let Some((base, n)) = request_id.rsplit_once("_retry_") {
        if let Ok(n) = n.parse::<u32>() {
            return format!("{}_retry_{}", base, n + 1);
        }
    }

    format!("{}_retry_1", request_id)
}

pub fn decode_message(payload: &[u8]) -> Result<EmailNotificationRequest, EmailError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Consumes the inbound email queue until the consumer stream ends.
///
/// Messages are acked only after handling completes; undecodable payloads and
/// processing errors are dead-lettered with the raw payload, then acked.
pub async fn run_queue_worker(
    queue: Arc<RabbitMqClient>,
    processor: Arc<NotificationProcessor>,
) -> Result<(), EmailError> {
    let mut consumer = queue.create_consumer().await?;

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "Failed to receive delivery");
                continue;
            }
        };

        let raw = String::from_utf8_lossy(&delivery.data).to_string();
        let correlation_id = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string());

        match decode_message(&delivery.data) {
            Ok(mut request) => {
                if request.correlation_id.is_none() {
                    request.correlation_id = correlation_id.clone();
                }

                if let Err(e) = processor.process_notification(request).await {
                    warn!(error = %e, "Message processing failed, dead-lettering");
                    queue
                        .publish_to_dlq(
                            &raw,
                            &format!("Processing error: {}", e),
                            correlation_id.as_deref(),
                        )
                        .await?;
                }
            }
            Err(e) => {
                warn!(error = %e, "Invalid message payload, dead-lettering");
                queue
                    .publish_to_dlq(
                        &raw,
                        &format!("JSON decode error: {}", e),
                        correlation_id.as_deref(),
                    )
                    .await?;
            }
        }

        queue.acknowledge(delivery.delivery_tag).await?;
    }

    Ok(())
}
