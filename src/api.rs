use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value as JsonValue, json};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    error::EmailError,
    models::{
        health::HealthStatus,
        message::{EmailNotificationRequest, EmailSendRequest, NotificationType},
        record::{EmailRecord, EmailStatus},
        response::ApiResponse,
    },
    processor::NotificationProcessor,
};

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<NotificationProcessor>,
    pub health_checker: Arc<HealthChecker>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/emails/send", post(send_email))
        .route("/api/v1/emails/{notification_id}", get(get_email))
        .route("/api/v1/emails/{notification_id}/retry", post(retry_email))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(port: u16, state: AppState) -> Result<(), EmailError> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| EmailError::Queue(format!("Failed to bind API listener: {}", e)))?;

    info!(port, "API server listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| EmailError::Queue(format!("API server error: {}", e)))?;

    Ok(())
}

async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<crate::models::health::HealthCheckResponse>) {
    let response = state.health_checker.check_all().await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

async fn send_email(
    State(state): State<AppState>,
    Json(request): Json<EmailSendRequest>,
) -> (StatusCode, Json<ApiResponse<EmailRecord>>) {
    let request = to_notification_request(request);

    match state.processor.process_notification(request).await {
        Ok(record) => record_response(record),
        Err(e) => error_response(e),
    }
}

async fn get_email(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<EmailRecord>>) {
    match state.processor.find_record(&notification_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "Email record found".to_string())),
        ),
        Ok(None) => error_response(EmailError::NotFound {
            resource: format!("notification {}", notification_id),
        }),
        Err(e) => error_response(e),
    }
}

async fn retry_email(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<EmailRecord>>) {
    match state.processor.resubmit(&notification_id).await {
        Ok(record) => record_response(record),
        Err(e) => error_response(e),
    }
}

/// Direct callers receive the terminal outcome: a FAILED record is reported
/// as a failure, with the record still attached for inspection.
fn record_response(record: EmailRecord) -> (StatusCode, Json<ApiResponse<EmailRecord>>) {
    if record.status == EmailStatus::Failed {
        let error = record
            .error_message
            .clone()
            .unwrap_or_else(|| "delivery failed".to_string());

        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse {
                success: false,
                data: Some(record),
                error: Some(error),
                message: "Email delivery failed".to_string(),
            }),
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(
            record,
            "Email accepted for delivery".to_string(),
        )),
    )
}

/// Translates a direct-send request into the queue message shape, carrying the
/// recipient inline so processing skips the user-service lookup.
fn to_notification_request(request: EmailSendRequest) -> EmailNotificationRequest {
    let mut metadata: HashMap<String, JsonValue> = HashMap::new();

    metadata.insert("recipient_email".to_string(), json!(request.recipient_email));

    if let Some(name) = &request.recipient_name {
        metadata.insert("recipient_name".to_string(), json!(name));
    }
    if let Some(language) = &request.language {
        metadata.insert("language".to_string(), json!(language));
    }
    if let Some(from_email) = &request.from_email {
        metadata.insert("from_email".to_string(), json!(from_email));
    }
    if let Some(from_name) = &request.from_name {
        metadata.insert("from_name".to_string(), json!(from_name));
    }
    if let Some(reply_to) = &request.reply_to {
        metadata.insert("reply_to".to_string(), json!(reply_to));
    }
    if let Some(cc) = &request.cc {
        metadata.insert("cc".to_string(), json!(cc));
    }
    if let Some(bcc) = &request.bcc {
        metadata.insert("bcc".to_string(), json!(bcc));
    }
    if let Some(provider) = &request.provider {
        metadata.insert("provider".to_string(), json!(provider));
    }

    EmailNotificationRequest {
        notification_id: request
            .notification_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        notification_type: NotificationType::Email,
        user_id: request.user_id,
        template_code: request.template_code,
        variables: request.variables,
        request_id: request
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        priority: request.priority,
        metadata,
        correlation_id: None,
    }
}

fn error_response(e: EmailError) -> (StatusCode, Json<ApiResponse<EmailRecord>>) {
    let status_code = match &e {
        EmailError::Validation(_) => StatusCode::BAD_REQUEST,
        EmailError::NotFound { .. } => StatusCode::NOT_FOUND,
        EmailError::CircuitOpen { .. } | EmailError::DependencyUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status_code,
        Json(ApiResponse::error(
            e.to_string(),
            "Request could not be completed".to_string(),
        )),
    )
}
