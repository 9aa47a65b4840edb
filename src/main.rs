use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use email_service::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::{DatabaseClient, RecordStore},
        dispatcher::DeliveryDispatcher,
        health::HealthChecker,
        rbmq::{RabbitMqClient, StatusPublisher},
        sendgrid::SendGridMailer,
        smtp::SmtpMailer,
        template::TemplateServiceClient,
        user::UserServiceClient,
    },
    config::Config,
    processor::{NotificationProcessor, run_queue_worker},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting email notification service");

    let config = Config::load()?;

    let database = Arc::new(
        DatabaseClient::connect(&config.database_url)
            .await
            .context("database connection failed")?,
    );

    let queue = Arc::new(
        RabbitMqClient::connect(&config)
            .await
            .context("RabbitMQ connection failed")?,
    );

    let breaker_config = config.circuit_breaker_config();
    let mut breakers: HashMap<String, Arc<CircuitBreaker>> = HashMap::new();

    for name in ["user_service", "template_service", "smtp", "sendgrid"] {
        breakers.insert(
            name.to_string(),
            Arc::new(CircuitBreaker::new(
                name.to_string(),
                breaker_config.clone(),
            )),
        );
    }

    let user_client = Arc::new(UserServiceClient::new(
        &config,
        Arc::clone(&breakers["user_service"]),
    )?);
    let template_client = Arc::new(TemplateServiceClient::new(
        &config,
        Arc::clone(&breakers["template_service"]),
    )?);

    let mut dispatcher = DeliveryDispatcher::new(config.email_provider.clone());
    dispatcher.register(
        Arc::new(SmtpMailer::new(&config)?),
        Arc::clone(&breakers["smtp"]),
    );

    if let Some(api_key) = config.sendgrid_api_key.clone() {
        dispatcher.register(
            Arc::new(SendGridMailer::new(&config, api_key)?),
            Arc::clone(&breakers["sendgrid"]),
        );
    }

    info!(providers = ?dispatcher.provider_names(), "Delivery providers ready");

    let processor = Arc::new(NotificationProcessor::new(
        Arc::clone(&database) as Arc<dyn RecordStore>,
        Arc::clone(&queue) as Arc<dyn StatusPublisher>,
        Arc::clone(&template_client),
        Arc::new(dispatcher),
        Some(Arc::clone(&user_client)),
        config.retry_config(),
        config.recipient_source,
    ));

    let health_checker = Arc::new(HealthChecker::new(
        config.rabbitmq_url.clone(),
        Arc::clone(&database) as Arc<dyn RecordStore>,
        breakers,
    ));

    let worker_queue = Arc::clone(&queue);
    let worker_processor = Arc::clone(&processor);

    tokio::spawn(async move {
        if let Err(e) = run_queue_worker(worker_queue, worker_processor).await {
            error!(error = %e, "Queue worker exited");
        }
    });

    run_api_server(
        config.server_port,
        AppState {
            processor,
            health_checker,
        },
    )
    .await?;

    Ok(())
}
