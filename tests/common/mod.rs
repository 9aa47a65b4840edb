#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use email_service::{
    clients::{database::RecordStore, dispatcher::Mailer, rbmq::StatusPublisher},
    config::{Config, RecipientSource},
    error::EmailError,
    models::{
        circuit_breaker::CircuitBreakerConfig,
        delivery::{DeliveryResult, OutgoingEmail},
        message::{EmailNotificationRequest, NotificationType},
        record::{EmailRecord, EmailStatus, NewEmailRecord, StatusUpdate},
        retry::RetryConfig,
    },
};

/// Config with every external endpoint pointed at `base_url`, tuned for fast
/// test retries.
pub fn test_config(base_url: &str) -> Config {
    Config {
        // Nothing listens on port 1: broker probes fail fast and reliably.
        rabbitmq_url: "amqp://127.0.0.1:1".to_string(),
        rabbitmq_exchange: "notifications".to_string(),
        email_queue_name: "email_queue".to_string(),
        status_queue_name: "status_queue".to_string(),
        failed_queue_name: "failed_queue".to_string(),
        prefetch_count: 10,
        database_url: "postgres://localhost/test".to_string(),
        user_service_url: base_url.to_string(),
        template_service_url: base_url.to_string(),
        request_timeout_seconds: 5,
        recipient_source: RecipientSource::Metadata,
        email_provider: "smtp".to_string(),
        smtp_host: "localhost".to_string(),
        smtp_port: 1025,
        smtp_username: "test".to_string(),
        smtp_password: "test".to_string(),
        smtp_use_tls: false,
        smtp_from_email: "noreply@example.com".to_string(),
        smtp_from_name: "Notifications".to_string(),
        sendgrid_api_key: None,
        sendgrid_api_url: base_url.to_string(),
        circuit_breaker_failure_threshold: 3,
        circuit_breaker_recovery_timeout_seconds: 60,
        max_retry_attempts: 3,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        retry_backoff_multiplier: 2,
        server_port: 0,
    }
}

pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2,
    }
}

pub fn breaker_config(failure_threshold: u32, recovery_timeout_seconds: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout_seconds,
    }
}

pub fn notification_request(request_id: &str) -> EmailNotificationRequest {
    let mut variables = HashMap::new();
    variables.insert("name".to_string(), json!("Ana"));

    let mut metadata = HashMap::new();
    metadata.insert("recipient_email".to_string(), json!("ana@example.com"));
    metadata.insert("recipient_name".to_string(), json!("Ana"));

    EmailNotificationRequest {
        notification_id: format!("notif-{request_id}"),
        notification_type: NotificationType::Email,
        user_id: "user-1".to_string(),
        template_code: "welcome".to_string(),
        variables,
        request_id: request_id.to_string(),
        priority: 1,
        metadata,
        correlation_id: Some("corr-1".to_string()),
    }
}

/// In-memory [`RecordStore`] mirroring the database semantics: one record per
/// `request_id`, retry_count bumped when an error is recorded, timestamps
/// stamped per status.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<EmailRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, request_id: &str) -> Option<EmailRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn admit(&self, new: NewEmailRecord) -> Result<(EmailRecord, bool), EmailError> {
        let mut records = self.records.lock().unwrap();

        if let Some(existing) = records.iter().find(|r| r.request_id == new.request_id) {
            return Ok((existing.clone(), true));
        }

        let record = EmailRecord {
            id: Uuid::new_v4(),
            notification_id: new.notification_id,
            request_id: new.request_id,
            correlation_id: new.correlation_id,
            user_id: new.user_id,
            template_code: new.template_code,
            recipient_email: new.recipient_email,
            recipient_name: new.recipient_name,
            subject: None,
            body_html: None,
            status: EmailStatus::Pending,
            priority: new.priority,
            retry_count: 0,
            error_message: None,
            provider: None,
            provider_message_id: None,
            metadata: new.metadata,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            failed_at: None,
        };

        records.push(record.clone());

        Ok((record, false))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        update: StatusUpdate,
    ) -> Result<EmailRecord, EmailError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| EmailError::NotFound {
                resource: format!("record {id}"),
            })?;

        record.status = status;

        if let Some(error) = update.error_message {
            record.error_message = Some(error);
            record.retry_count += 1;
        }
        if let Some(provider) = update.provider {
            record.provider = Some(provider);
        }
        if let Some(message_id) = update.provider_message_id {
            record.provider_message_id = Some(message_id);
        }

        match status {
            EmailStatus::Sending => record.sent_at = Some(Utc::now()),
            EmailStatus::Sent | EmailStatus::Delivered => record.delivered_at = Some(Utc::now()),
            EmailStatus::Failed | EmailStatus::Bounced => record.failed_at = Some(Utc::now()),
            EmailStatus::Pending => {}
        }

        Ok(record.clone())
    }

    async fn set_recipient(
        &self,
        id: Uuid,
        recipient_email: &str,
        recipient_name: Option<&str>,
    ) -> Result<(), EmailError> {
        let mut records = self.records.lock().unwrap();

        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.recipient_email = recipient_email.to_string();
            record.recipient_name = recipient_name.map(|n| n.to_string());
        }

        Ok(())
    }

    async fn set_content(
        &self,
        id: Uuid,
        subject: &str,
        body_html: &str,
    ) -> Result<(), EmailError> {
        let mut records = self.records.lock().unwrap();

        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.subject = Some(subject.to_string());
            record.body_html = Some(body_html.to_string());
        }

        Ok(())
    }

    async fn find_by_notification_id(
        &self,
        notification_id: &str,
    ) -> Result<Option<EmailRecord>, EmailError> {
        let records = self.records.lock().unwrap();

        Ok(records
            .iter()
            .rev()
            .find(|r| r.notification_id == notification_id)
            .cloned())
    }

    async fn health_check(&self) -> Result<(), EmailError> {
        Ok(())
    }
}

/// Captures published status events instead of touching a broker, optionally
/// erroring on one chosen status.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, EmailStatus, JsonValue)>>,
    fail_on: Option<EmailStatus>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(status: EmailStatus) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_on: Some(status),
        }
    }

    pub fn events(&self) -> Vec<(String, EmailStatus, JsonValue)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish_status(
        &self,
        notification_id: &str,
        status: EmailStatus,
        _correlation_id: Option<&str>,
        metadata: JsonValue,
    ) -> Result<(), EmailError> {
        if self.fail_on == Some(status) {
            return Err(EmailError::Queue("broker gone".to_string()));
        }

        self.events
            .lock()
            .unwrap()
            .push((notification_id.to_string(), status, metadata));

        Ok(())
    }
}

/// Scripted provider: fails its first `fail_first` sends, then succeeds.
pub struct MockMailer {
    provider_name: String,
    fail_first: usize,
    calls: AtomicUsize,
}

impl MockMailer {
    pub fn new(provider_name: &str, fail_first: usize) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            fail_first,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reliable(provider_name: &str) -> Self {
        Self::new(provider_name, 0)
    }

    pub fn always_failing(provider_name: &str) -> Self {
        Self::new(provider_name, usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryResult, EmailError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if call < self.fail_first {
            return Err(EmailError::Provider {
                provider: self.provider_name.clone(),
                reason: format!("simulated failure sending to {}", email.to),
            });
        }

        Ok(DeliveryResult {
            provider: self.provider_name.clone(),
            provider_message_id: Some(format!("{}-msg-{}", self.provider_name, call)),
        })
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}
