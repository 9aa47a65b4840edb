use async_trait::async_trait;
use chrono::Utc;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::EmailError,
    models::{
        message::{DlqMessage, StatusEvent},
        record::EmailStatus,
    },
};

/// Inbound messages expire after 24 hours.
const EMAIL_QUEUE_TTL_MS: i64 = 86_400_000;

/// Outbound status-event seam, so the processor can publish without holding a
/// broker connection in tests.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish_status(
        &self,
        notification_id: &str,
        status: EmailStatus,
        correlation_id: Option<&str>,
        metadata: JsonValue,
    ) -> Result<(), EmailError>;
}

/// Queue gateway: one durable topic exchange with three bound queues for
/// inbound notifications (`email.*`), status events (`status.*`), and dead
/// letters (`failed.*`).
pub struct RabbitMqClient {
    channel: Channel,
    exchange_name: String,
    email_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, EmailError> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| EmailError::Queue(format!("RabbitMQ channel creation failed: {}", e)))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to set up QoS: {}", e)))?;

        channel
            .exchange_declare(
                &config.rabbitmq_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to declare exchange: {}", e)))?;

        let mut email_queue_args = FieldTable::default();
        email_queue_args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(EMAIL_QUEUE_TTL_MS),
        );

        let bindings = [
            (&config.email_queue_name, "email.*", email_queue_args),
            (&config.status_queue_name, "status.*", FieldTable::default()),
            (&config.failed_queue_name, "failed.*", FieldTable::default()),
        ];

        for (queue_name, routing_key, args) in bindings {
            channel
                .queue_declare(
                    queue_name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    args,
                )
                .await
                .map_err(|e| {
                    EmailError::Queue(format!("Failed to declare queue {}: {}", queue_name, e))
                })?;

            channel
                .queue_bind(
                    queue_name,
                    &config.rabbitmq_exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    EmailError::Queue(format!("Failed to bind queue {}: {}", queue_name, e))
                })?;
        }

        info!(
            exchange = %config.rabbitmq_exchange,
            email_queue = %config.email_queue_name,
            prefetch = config.prefetch_count,
            "RabbitMQ topology declared"
        );

        Ok(Self {
            channel,
            exchange_name: config.rabbitmq_exchange.clone(),
            email_queue_name: config.email_queue_name.clone(),
        })
    }

    pub async fn create_consumer(&self) -> Result<Consumer, EmailError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.email_queue_name,
                "email_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to create consumer: {}", e)))?;

        info!(queue = %self.email_queue_name, "Consumer created");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), EmailError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to acknowledge message: {}", e)))?;

        Ok(())
    }

    /// Routes an unprocessable payload to the dead-letter queue. Dead-lettering
    /// is terminal; the original message is acked afterwards, never requeued.
    pub async fn publish_to_dlq(
        &self,
        original_message: &str,
        error: &str,
        correlation_id: Option<&str>,
    ) -> Result<(), EmailError> {
        let message = DlqMessage {
            original_message: original_message.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        };

        let payload = serde_json::to_vec(&message)?;

        self.channel
            .basic_publish(
                &self.exchange_name,
                "failed.email",
                BasicPublishOptions::default(),
                &payload,
                properties(correlation_id),
            )
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to publish to dlq: {}", e)))?;

        debug!("Message routed to dead-letter queue");

        Ok(())
    }
}

#[async_trait]
impl StatusPublisher for RabbitMqClient {
    async fn publish_status(
        &self,
        notification_id: &str,
        status: EmailStatus,
        correlation_id: Option<&str>,
        metadata: JsonValue,
    ) -> Result<(), EmailError> {
        let event = StatusEvent {
            notification_id: notification_id.to_string(),
            status: status.as_str().to_uppercase(),
            timestamp: Utc::now(),
            metadata,
        };

        let payload = serde_json::to_vec(&event)?;
        let routing_key = format!("status.{}", status.as_str());

        self.channel
            .basic_publish(
                &self.exchange_name,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties(correlation_id),
            )
            .await
            .map_err(|e| EmailError::Queue(format!("Failed to publish status event: {}", e)))?;

        debug!(notification_id, status = %status, "Status event published");

        Ok(())
    }
}

fn properties(correlation_id: Option<&str>) -> BasicProperties {
    let props = BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into());

    match correlation_id {
        Some(correlation_id) => props.with_correlation_id(correlation_id.into()),
        None => props,
    }
}
