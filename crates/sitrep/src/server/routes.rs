//! API handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;

use crate::broadcast::{JobCounts, JobRecord, Stage, StepState, StreamEvent, SummaryStats};
use crate::error::{Result, SitrepError};
use crate::processor::AnalysisResult;
use crate::service::SitrepService;

pub type AppState = Arc<SitrepService>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StepView {
    pub stage: Stage,
    pub state: StepState,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub job: JobRecord,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub counts: JobCounts,
}

/// POST /api/upload - accept a CSV in the multipart field `file`
pub async fn upload(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SitrepError::Validation(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| SitrepError::Validation(format!("failed to read upload: {}", e)))?;

        let job_id = service.submit_upload(&filename, &data)?;
        return Ok(Json(UploadResponse {
            job_id,
            message: "Upload accepted, processing started".to_string(),
        }));
    }

    Err(SitrepError::Validation(
        "multipart field 'file' is required".to_string(),
    ))
}

/// GET /api/status/:job_id
pub async fn status(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let job = service.status(&job_id)?;
    let steps = job
        .step_states()
        .into_iter()
        .map(|(stage, state)| StepView { stage, state })
        .collect();
    Ok(Json(StatusResponse { job, steps }))
}

/// GET /api/progress-stream/:job_id - Server-Sent Events
pub async fn progress_stream(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let subscription = service.subscribe(&job_id)?;
    tracing::debug!(job_id = %job_id, "progress stream opened");

    let stream = subscription.into_stream().map(|event| Ok(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to serialize stream event");
        String::from("{}")
    });
    Event::default().event(event.kind()).data(data)
}

/// GET /api/stats/:job_id
pub async fn stats(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SummaryStats>> {
    Ok(Json(service.summary_stats(&job_id)?))
}

/// GET /api/data/:job_id - domestic and foreign items of a completed job
pub async fn processed_data(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<AnalysisResult>> {
    Ok(Json(service.processed_data(&job_id)?))
}

/// GET /api/download/:job_id
pub async fn download(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse> {
    let document = service.document(&job_id)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        document.file_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, document.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.bytes,
    ))
}

/// GET /api/jobs
pub async fn list_jobs(State(service): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: service.jobs(),
        counts: service.counts(),
    })
}

/// GET /health
pub async fn health(State(service): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": service.counts(),
    }))
}
