mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use email_service::{
    clients::{
        circuit_breaker::CircuitBreaker,
        dispatcher::{DeliveryDispatcher, Mailer},
        sendgrid::SendGridMailer,
    },
    error::EmailError,
    models::delivery::{OutgoingEmail, SenderOverrides},
};

use common::{MockMailer, breaker_config, test_config};

fn outgoing(provider: Option<&str>) -> OutgoingEmail {
    OutgoingEmail {
        to: "ana@example.com".to_string(),
        recipient_name: Some("Ana".to_string()),
        subject: "Welcome".to_string(),
        html_body: "<p>Hello</p>".to_string(),
        overrides: SenderOverrides {
            provider: provider.map(|p| p.to_string()),
            ..Default::default()
        },
    }
}

fn breaker(name: &str) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(name.to_string(), breaker_config(2, 60)))
}

#[tokio::test]
async fn routes_to_default_provider() {
    let smtp = Arc::new(MockMailer::reliable("smtp"));
    let sendgrid = Arc::new(MockMailer::reliable("sendgrid"));

    let mut dispatcher = DeliveryDispatcher::new("smtp".to_string());
    dispatcher.register(Arc::clone(&smtp) as Arc<dyn Mailer>, breaker("smtp"));
    dispatcher.register(Arc::clone(&sendgrid) as Arc<dyn Mailer>, breaker("sendgrid"));

    let result = dispatcher.send(&outgoing(None)).await.unwrap();

    assert_eq!(result.provider, "smtp");
    assert_eq!(smtp.calls(), 1);
    assert_eq!(sendgrid.calls(), 0);
}

#[tokio::test]
async fn per_request_override_selects_provider() {
    let smtp = Arc::new(MockMailer::reliable("smtp"));
    let sendgrid = Arc::new(MockMailer::reliable("sendgrid"));

    let mut dispatcher = DeliveryDispatcher::new("smtp".to_string());
    dispatcher.register(Arc::clone(&smtp) as Arc<dyn Mailer>, breaker("smtp"));
    dispatcher.register(Arc::clone(&sendgrid) as Arc<dyn Mailer>, breaker("sendgrid"));

    let result = dispatcher.send(&outgoing(Some("sendgrid"))).await.unwrap();

    assert_eq!(result.provider, "sendgrid");
    assert_eq!(smtp.calls(), 0);
    assert_eq!(sendgrid.calls(), 1);
}

#[tokio::test]
async fn unknown_provider_is_a_validation_error() {
    let mut dispatcher = DeliveryDispatcher::new("smtp".to_string());
    dispatcher.register(
        Arc::new(MockMailer::reliable("smtp")) as Arc<dyn Mailer>,
        breaker("smtp"),
    );

    let result = dispatcher.send(&outgoing(Some("pigeon"))).await;

    match result {
        Err(EmailError::Validation(msg)) => assert!(msg.contains("pigeon")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn one_provider_circuit_opening_does_not_block_others() {
    let smtp = Arc::new(MockMailer::always_failing("smtp"));
    let sendgrid = Arc::new(MockMailer::reliable("sendgrid"));

    let mut dispatcher = DeliveryDispatcher::new("smtp".to_string());
    dispatcher.register(Arc::clone(&smtp) as Arc<dyn Mailer>, breaker("smtp"));
    dispatcher.register(Arc::clone(&sendgrid) as Arc<dyn Mailer>, breaker("sendgrid"));

    for _ in 0..2 {
        assert!(dispatcher.send(&outgoing(None)).await.is_err());
    }

    // smtp breaker is now open and rejects without reaching the transport.
    let rejected = dispatcher.send(&outgoing(None)).await;
    assert!(matches!(rejected, Err(EmailError::CircuitOpen { .. })));
    assert_eq!(smtp.calls(), 2);

    let result = dispatcher.send(&outgoing(Some("sendgrid"))).await.unwrap();
    assert_eq!(result.provider, "sendgrid");
}

#[tokio::test]
async fn sendgrid_mailer_posts_v3_payload_and_captures_message_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(header("Authorization", "Bearer sg-key"))
        .and(body_partial_json(json!({
            "personalizations": [{"to": [{"email": "ana@example.com", "name": "Ana"}]}],
            "from": {"email": "noreply@example.com", "name": "Notifications"},
            "subject": "Welcome",
            "content": [{"type": "text/html", "value": "<p>Hello</p>"}]
        })))
        .respond_with(
            ResponseTemplate::new(202).insert_header("X-Message-Id", "sg-message-1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mailer =
        SendGridMailer::new(&test_config(&server.uri()), "sg-key".to_string()).unwrap();

    let result = mailer.send(&outgoing(None)).await.unwrap();

    assert_eq!(result.provider, "sendgrid");
    assert_eq!(result.provider_message_id.as_deref(), Some("sg-message-1"));
}

#[tokio::test]
async fn sendgrid_rejection_is_a_provider_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad api key"))
        .mount(&server)
        .await;

    let mailer =
        SendGridMailer::new(&test_config(&server.uri()), "wrong-key".to_string()).unwrap();

    let result = mailer.send(&outgoing(None)).await;

    match result {
        Err(EmailError::Provider { provider, reason }) => {
            assert_eq!(provider, "sendgrid");
            assert!(reason.contains("bad api key"));
        }
        other => panic!("expected provider error, got {other:?}"),
    }
}
