//! Analyzers that split media items into domestic and foreign sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::ProcessError;
use crate::processor::{AnalysisItem, AnalysisResult, Analyzer, CleanRecord};

/// Maximum length for error bodies kept in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}

/// Local analyzer: items whose language mentions Chinese are domestic.
#[derive(Debug, Default, Clone)]
pub struct LanguageAnalyzer;

impl LanguageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn is_domestic(record: &CleanRecord) -> bool {
        record
            .language
            .as_deref()
            .map(|lang| lang.contains("Chinese") || lang.contains("中文"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Analyzer for LanguageAnalyzer {
    fn name(&self) -> &str {
        "language"
    }

    async fn analyze(&self, records: &[CleanRecord]) -> Result<AnalysisResult, ProcessError> {
        let (domestic, foreign): (Vec<&CleanRecord>, Vec<&CleanRecord>) =
            records.iter().partition(|r| Self::is_domestic(r));

        Ok(AnalysisResult {
            domestic: domestic.into_iter().map(AnalysisItem::from).collect(),
            foreign: foreign.into_iter().map(AnalysisItem::from).collect(),
        })
    }
}

/// Remote analyzer calling a workflow endpoint in blocking response mode.
pub struct WorkflowAnalyzer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    user: String,
}

impl WorkflowAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProcessError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProcessError::AnalysisRequest(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            user: "sitrep".to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn payload(&self, records: &[CleanRecord]) -> Result<Value, ProcessError> {
        let raw_data = serde_json::to_string(records)
            .map_err(|e| ProcessError::AnalysisRequest(e.to_string()))?;
        Ok(json!({
            "inputs": { "raw_data": raw_data },
            "response_mode": "blocking",
            "user": self.user,
        }))
    }
}

#[async_trait]
impl Analyzer for WorkflowAnalyzer {
    fn name(&self) -> &str {
        "workflow"
    }

    async fn analyze(&self, records: &[CleanRecord]) -> Result<AnalysisResult, ProcessError> {
        let mut request = self.client.post(&self.endpoint).json(&self.payload(records)?);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        log::info!(
            "Submitting {} records to analysis workflow at {}",
            records.len(),
            self.endpoint
        );
        let response = request
            .send()
            .await
            .map_err(|e| ProcessError::AnalysisRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessError::AnalysisRequest(format!(
                "HTTP {}: {}",
                status,
                truncate_body(&body)
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProcessError::AnalysisResponse(e.to_string()))?;
        extract_sources(&body)
    }
}

/// Reads the categorized sources out of a workflow run response.
///
/// Accepts `data.outputs.structured_output.{domestic_sources,foreign_sources}`
/// (as an object or a JSON string) or the same keys directly under
/// `data.outputs`.
pub fn extract_sources(body: &Value) -> Result<AnalysisResult, ProcessError> {
    let data = body.get("data").unwrap_or(body);

    match data.get("status").and_then(Value::as_str) {
        Some("failed") => {
            let detail = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no error detail");
            return Err(ProcessError::AnalysisWorkflow(truncate_body(detail)));
        }
        Some("running") => {
            return Err(ProcessError::AnalysisWorkflow(
                "workflow is still running".to_string(),
            ));
        }
        _ => {}
    }

    let outputs = data
        .get("outputs")
        .filter(|o| o.is_object())
        .ok_or_else(|| ProcessError::AnalysisResponse("response has no outputs".to_string()))?;

    let structured = match outputs.get("structured_output") {
        Some(Value::String(raw)) => Some(
            serde_json::from_str::<Value>(raw)
                .map_err(|e| ProcessError::AnalysisResponse(e.to_string()))?,
        ),
        Some(value) if value.is_object() => Some(value.clone()),
        _ => None,
    };
    let sources = structured.as_ref().unwrap_or(outputs);

    if sources.get("domestic_sources").is_none() && sources.get("foreign_sources").is_none() {
        return Err(ProcessError::AnalysisResponse(
            "outputs contain neither domestic_sources nor foreign_sources".to_string(),
        ));
    }

    Ok(AnalysisResult {
        domestic: items(sources, "domestic_sources")?,
        foreign: items(sources, "foreign_sources")?,
    })
}

fn items(sources: &Value, key: &str) -> Result<Vec<AnalysisItem>, ProcessError> {
    match sources.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ProcessError::AnalysisResponse(format!("{}: {}", key, e))),
    }
}
