use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::EmailError,
    models::{
        retry::RetryConfig,
        template::{RenderedEmail, TemplateData, TemplateEnvelope},
    },
    utils::retry_with_backoff,
};

const SERVICE: &str = "template_service";

pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl TemplateServiceClient {
    pub fn new(config: &Config, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, EmailError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| EmailError::dependency(SERVICE, e))?;

        info!(base_url = %config.template_service_url, "Template service client initialized");

        Ok(Self {
            http_client,
            base_url: config.template_service_url.clone(),
            retry_config: config.retry_config(),
            circuit_breaker,
        })
    }

    pub async fn fetch_template(
        &self,
        template_code: &str,
        language: &str,
        correlation_id: Option<&str>,
    ) -> Result<TemplateData, EmailError> {
        let url = format!(
            "{}/api/v1/templates/code/{}?language={}",
            self.base_url, template_code, language
        );

        debug!(template_code, language, "Fetching template from service");

        let http_client = self.http_client.clone();
        let retry_config = self.retry_config.clone();
        let correlation_id = correlation_id.map(|s| s.to_string());
        let template_code = template_code.to_string();

        self.circuit_breaker
            .call(|| async move {
                retry_with_backoff(&retry_config, || {
                    Self::fetch_once(
                        http_client.clone(),
                        url.clone(),
                        template_code.clone(),
                        correlation_id.clone(),
                    )
                })
                .await
            })
            .await
    }

    /// Fetches and renders a template in one step.
    pub async fn render_email_template(
        &self,
        template_code: &str,
        variables: &HashMap<String, serde_json::Value>,
        language: &str,
        correlation_id: Option<&str>,
    ) -> Result<RenderedEmail, EmailError> {
        let template = self
            .fetch_template(template_code, language, correlation_id)
            .await?;

        let subject = match &template.subject {
            Some(subject) => Self::replace_variables(subject, variables)?,
            None => String::new(),
        };
        let body_html = Self::replace_variables(&template.content, variables)?;

        debug!(template_code, "Template rendered successfully");

        Ok(RenderedEmail { subject, body_html })
    }

    async fn fetch_once(
        http_client: Client,
        url: String,
        template_code: String,
        correlation_id: Option<String>,
    ) -> Result<TemplateData, EmailError> {
        let mut request = http_client.get(&url);

        if let Some(correlation_id) = &correlation_id {
            request = request.header("X-Correlation-ID", correlation_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmailError::dependency(SERVICE, e))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(EmailError::NotFound {
                resource: format!("template {}", template_code),
            });
        }

        if !status.is_success() {
            return Err(EmailError::dependency(
                SERVICE,
                format!("returned status {}", status),
            ));
        }

        let envelope: TemplateEnvelope = response
            .json()
            .await
            .map_err(|e| EmailError::dependency(SERVICE, format!("invalid response: {}", e)))?;

        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(EmailError::dependency(
                SERVICE,
                envelope
                    .message
                    .unwrap_or_else(|| "missing response data".to_string()),
            )),
        }
    }

    /// Substitutes `{{name}}` placeholders found in the template. A
    /// placeholder with no matching variable, or a variable of unsupported
    /// type, fails rendering as a validation error. Substituted values are
    /// never rescanned, so a value containing braces passes through verbatim.
    pub fn replace_variables(
        template: &str,
        variables: &HashMap<String, serde_json::Value>,
    ) -> Result<String, EmailError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(end) = rest[start..].find("}}") else {
                break;
            };

            result.push_str(&rest[..start]);

            let key = &rest[start + 2..start + end];

            let value = variables.get(key).ok_or_else(|| {
                warn!(missing_variable = key, "Template references an unknown variable");

                EmailError::Validation(format!(
                    "Missing variable in template: {{{{{}}}}}",
                    key
                ))
            })?;

            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                _ => {
                    return Err(EmailError::Validation(format!(
                        "Unsupported variable type for key '{}'",
                        key
                    )));
                }
            };

            result.push_str(&replacement);
            rest = &rest[start + end + 2..];
        }

        result.push_str(rest);

        Ok(result)
    }
}
