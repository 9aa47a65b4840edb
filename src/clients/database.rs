use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::EmailError;
use crate::models::record::{EmailRecord, EmailStatus, NewEmailRecord, StatusUpdate};

const RECORD_COLUMNS: &str = "id, notification_id, request_id, correlation_id, user_id, \
     template_code, recipient_email, recipient_name, subject, body_html, status, priority, \
     retry_count, error_message, provider, provider_message_id, metadata, created_at, sent_at, \
     delivered_at, failed_at";

/// Durable, idempotent ledger of one record per `request_id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record keyed by `request_id`, atomically with respect to
    /// the uniqueness constraint. Returns the existing record and `true` when
    /// the key was already admitted.
    async fn admit(&self, new: NewEmailRecord) -> Result<(EmailRecord, bool), EmailError>;

    /// Applies a status transition, stamping its timestamp and bumping
    /// `retry_count` when an error message is recorded.
    async fn update_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        update: StatusUpdate,
    ) -> Result<EmailRecord, EmailError>;

    /// Fills in the recipient once service-side resolution completes.
    async fn set_recipient(
        &self,
        id: Uuid,
        recipient_email: &str,
        recipient_name: Option<&str>,
    ) -> Result<(), EmailError>;

    /// Stores the rendered subject and body on the record.
    async fn set_content(
        &self,
        id: Uuid,
        subject: &str,
        body_html: &str,
    ) -> Result<(), EmailError>;

    /// Most recent record for a notification id (resubmissions share it).
    async fn find_by_notification_id(
        &self,
        notification_id: &str,
    ) -> Result<Option<EmailRecord>, EmailError>;

    /// Liveness probe against the backing store.
    async fn health_check(&self) -> Result<(), EmailError>;
}

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, EmailError> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed");
            }
        });

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS email_records (
                    id UUID PRIMARY KEY,
                    notification_id TEXT NOT NULL,
                    request_id TEXT NOT NULL UNIQUE,
                    correlation_id TEXT,
                    user_id TEXT NOT NULL,
                    template_code TEXT NOT NULL,
                    recipient_email TEXT NOT NULL,
                    recipient_name TEXT,
                    subject TEXT,
                    body_html TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    priority INT NOT NULL DEFAULT 1,
                    retry_count INT NOT NULL DEFAULT 0,
                    error_message TEXT,
                    provider TEXT,
                    provider_message_id TEXT,
                    metadata JSONB NOT NULL DEFAULT '{}',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    sent_at TIMESTAMPTZ,
                    delivered_at TIMESTAMPTZ,
                    failed_at TIMESTAMPTZ
                );
                CREATE INDEX IF NOT EXISTS email_records_notification_id_idx
                    ON email_records (notification_id);",
            )
            .await?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    fn record_from_row(row: &Row) -> Result<EmailRecord, EmailError> {
        let status: String = row.try_get("status")?;

        Ok(EmailRecord {
            id: row.try_get("id")?,
            notification_id: row.try_get("notification_id")?,
            request_id: row.try_get("request_id")?,
            correlation_id: row.try_get("correlation_id")?,
            user_id: row.try_get("user_id")?,
            template_code: row.try_get("template_code")?,
            recipient_email: row.try_get("recipient_email")?,
            recipient_name: row.try_get("recipient_name")?,
            subject: row.try_get("subject")?,
            body_html: row.try_get("body_html")?,
            status: EmailStatus::from_str(&status),
            priority: row.try_get("priority")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            provider: row.try_get("provider")?,
            provider_message_id: row.try_get("provider_message_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            sent_at: row.try_get("sent_at")?,
            delivered_at: row.try_get("delivered_at")?,
            failed_at: row.try_get("failed_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for DatabaseClient {
    async fn admit(&self, new: NewEmailRecord) -> Result<(EmailRecord, bool), EmailError> {
        let id = Uuid::new_v4();

        let insert = format!(
            "INSERT INTO email_records (id, notification_id, request_id, correlation_id, \
             user_id, template_code, recipient_email, recipient_name, priority, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (request_id) DO NOTHING \
             RETURNING {RECORD_COLUMNS}"
        );

        let inserted = self
            .client
            .query_opt(
                &insert,
                &[
                    &id,
                    &new.notification_id,
                    &new.request_id,
                    &new.correlation_id,
                    &new.user_id,
                    &new.template_code,
                    &new.recipient_email,
                    &new.recipient_name,
                    &new.priority,
                    &new.metadata,
                ],
            )
            .await?;

        match inserted {
            Some(row) => {
                debug!(request_id = %new.request_id, "Notification record admitted");
                Ok((Self::record_from_row(&row)?, false))
            }
            None => {
                // Lost the insert race or a redelivery: hand back the winner.
                let select =
                    format!("SELECT {RECORD_COLUMNS} FROM email_records WHERE request_id = $1");
                let row = self.client.query_one(&select, &[&new.request_id]).await?;
                Ok((Self::record_from_row(&row)?, true))
            }
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        update: StatusUpdate,
    ) -> Result<EmailRecord, EmailError> {
        let sql = format!(
            "UPDATE email_records SET \
                status = $2, \
                error_message = COALESCE($3, error_message), \
                retry_count = retry_count + CASE WHEN $3::TEXT IS NULL THEN 0 ELSE 1 END, \
                provider = COALESCE($4, provider), \
                provider_message_id = COALESCE($5, provider_message_id), \
                sent_at = CASE WHEN $2 = 'sending' THEN now() ELSE sent_at END, \
                delivered_at = CASE WHEN $2 IN ('sent', 'delivered') THEN now() ELSE delivered_at END, \
                failed_at = CASE WHEN $2 IN ('failed', 'bounced') THEN now() ELSE failed_at END \
             WHERE id = $1 \
             RETURNING {RECORD_COLUMNS}"
        );

        let row = self
            .client
            .query_one(
                &sql,
                &[
                    &id,
                    &status.as_str(),
                    &update.error_message,
                    &update.provider,
                    &update.provider_message_id,
                ],
            )
            .await?;

        debug!(record_id = %id, status = %status, "Notification record updated");

        Self::record_from_row(&row)
    }

    async fn set_recipient(
        &self,
        id: Uuid,
        recipient_email: &str,
        recipient_name: Option<&str>,
    ) -> Result<(), EmailError> {
        self.client
            .execute(
                "UPDATE email_records SET recipient_email = $2, recipient_name = $3 WHERE id = $1",
                &[&id, &recipient_email, &recipient_name],
            )
            .await?;

        Ok(())
    }

    async fn set_content(
        &self,
        id: Uuid,
        subject: &str,
        body_html: &str,
    ) -> Result<(), EmailError> {
        self.client
            .execute(
                "UPDATE email_records SET subject = $2, body_html = $3 WHERE id = $1",
                &[&id, &subject, &body_html],
            )
            .await?;

        Ok(())
    }

    async fn find_by_notification_id(
        &self,
        notification_id: &str,
    ) -> Result<Option<EmailRecord>, EmailError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM email_records \
             WHERE notification_id = $1 ORDER BY created_at DESC LIMIT 1"
        );

        let row = self.client.query_opt(&sql, &[&notification_id]).await?;

        row.map(|r| Self::record_from_row(&r)).transpose()
    }

    async fn health_check(&self) -> Result<(), EmailError> {
        self.client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}
