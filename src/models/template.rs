use serde::{Deserialize, Serialize};

/// Envelope returned by the template service
/// (`GET /api/v1/templates/code/{code}?language=`).
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateEnvelope {
    pub success: bool,
    pub data: Option<TemplateData>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateData {
    pub subject: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body_html: String,
}
