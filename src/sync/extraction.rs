use crate::sync::calendar_api::{authorize, check_status, non_empty, read_json, ApiError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Create,
    Update,
    Delete,
}

impl Action {
    /// Missing or unrecognized actions resolve to `Create`.
    pub fn resolve(raw: Option<&str>) -> Self {
        match raw.map(|a| a.trim().to_ascii_uppercase()).as_deref() {
            Some("UPDATE") => Self::Update,
            Some("DELETE") => Self::Delete,
            _ => Self::Create,
        }
    }
}

/// Best-effort structured guess returned by the extraction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub action: Option<String>,
    pub title: Option<String>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub search_title: Option<String>,
    pub confidence: Option<f64>,
}

impl ExtractionResult {
    pub fn action(&self) -> Action {
        Action::resolve(self.action.as_deref())
    }

    /// Blank strings count as absent.
    pub fn normalized(self) -> Self {
        Self {
            action: non_empty(self.action),
            title: non_empty(self.title),
            start_date: non_empty(self.start_date),
            start_time: non_empty(self.start_time),
            category: non_empty(self.category),
            priority: non_empty(self.priority),
            search_title: non_empty(self.search_title),
            confidence: self.confidence,
        }
    }

    /// Reference used to locate the target of an update or delete.
    pub fn target_reference(&self) -> Option<&str> {
        self.search_title.as_deref().or(self.title.as_deref())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ApiError>;
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

pub struct HttpExtractionClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpExtractionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl EventExtractor for HttpExtractionClient {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ApiError> {
        let url = format!("{}/api/ai/extract", self.base_url);
        tracing::info!("Sending text to extraction service");
        tracing::debug!("POST {} with text: {}", url, text);

        let request = authorize(self.client.post(&url), self.token.as_deref())
            .json(&ExtractRequest { text });
        let response = check_status(request.send().await?).await?;
        let result: ExtractionResult = read_json(response).await?;

        tracing::info!(
            "Extraction returned action {:?} (confidence {:?})",
            result.action,
            result.confidence
        );
        Ok(result.normalized())
    }
}
