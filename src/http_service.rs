use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::api_error::{AppError, AppResult};
use crate::application::job_service::{JobService, JOB_FINISHED};
use crate::config::ServerConfig;
use crate::domain::{
    error::BulkUpdateError,
    models::{default_delay, parse_delay, Action, BatchSize, JobLog, JobReport, JobRequest},
};
use crate::infrastructure::{
    parsers::SpreadsheetReader,
    upload::StagedUpload,
    webhook::RestCrmGateway,
};

pub const COMPLETION_MESSAGE: &str = "Execution completed";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub jobs: Arc<JobService>,
}

impl AppState {
    /// Wires the production reader and webhook gateway.
    pub fn from_config(config: ServerConfig) -> Self {
        let reader = Arc::new(SpreadsheetReader::new());
        let gateway = Arc::new(RestCrmGateway::new(config.check_timeout, config.batch_timeout));
        Self {
            config: Arc::new(config),
            jobs: Arc::new(JobService::new(reader, gateway)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    Router::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub report: JobReport,
}

/// Text fields and the optional staged spreadsheet of one `/execute` form.
struct ExecuteForm {
    fields: HashMap<String, String>,
    upload: Option<StagedUpload>,
}

impl ExecuteForm {
    fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// A present but blank value counts as absent, so defaults still apply.
    fn non_blank(&self, name: &str) -> Option<&str> {
        self.text(name).filter(|v| !v.trim().is_empty())
    }
}

async fn read_form(mut multipart: Multipart, upload_dir: &Path) -> Result<ExecuteForm, BulkUpdateError> {
    let mut fields = HashMap::new();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BulkUpdateError::Validation(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| BulkUpdateError::Validation(e.to_string()))?;

            // Browsers send an empty part when no file was picked.
            if filename.is_empty() && data.is_empty() {
                continue;
            }
            upload = Some(StagedUpload::stage(upload_dir, &filename, &data).await?);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| BulkUpdateError::Validation(e.to_string()))?;
            fields.insert(name, value);
        }
    }

    Ok(ExecuteForm { fields, upload })
}

fn job_request(form: &ExecuteForm, upload: Option<&StagedUpload>) -> Result<JobRequest, BulkUpdateError> {
    let batch_size = match form.non_blank("batch_limit") {
        Some(raw) => BatchSize::parse(raw)?,
        None => BatchSize::default(),
    };
    let delay = match form.non_blank("delay_batch") {
        Some(raw) => parse_delay(raw)?,
        None => default_delay(),
    };

    Ok(JobRequest {
        webhook_base: form.text("webhook_base").unwrap_or_default().to_string(),
        entity: form.text("entity").unwrap_or_default().to_string(),
        action: Action::parse(form.text("action").unwrap_or_default()),
        batch_size,
        delay,
        field_id: form.text("field_id").map(str::to_string),
        new_value: form.text("new_value").map(str::to_string),
        file_path: upload.map(|u| u.path().to_path_buf()),
    })
}

/// POST /execute
///
/// Runs one bulk job start to finish and returns its log. Only an unreadable form or
/// an `update` without a file get a 400; every other failure is reported inside the log.
async fn execute(State(state): State<AppState>, multipart: Multipart) -> AppResult<Json<ExecuteResponse>> {
    let job_id = Uuid::new_v4();
    let started_at = Utc::now();
    let log = JobLog::new();

    let form = match read_form(multipart, &state.config.upload_dir).await {
        Ok(form) => form,
        Err(BulkUpdateError::Upload(msg)) => {
            error!(%job_id, "Failed to stage upload: {}", msg);
            log.push(format!("Unexpected server error: {msg}"));
            return Ok(respond(job_id, started_at, &log));
        }
        Err(e) => return Err(e.into()),
    };

    debug!(%job_id, "Received form fields: {:?}", form.fields.keys().collect::<Vec<_>>());

    let action = Action::parse(form.text("action").unwrap_or_default());
    // Only `update` uses its upload; a file sent with any other action is just removed.
    let upload = match (&action, form.upload.as_ref()) {
        (Action::Update, None) => {
            return Err(AppError::BadRequest("No file uploaded for the 'update' action".to_string()));
        }
        (Action::Update, Some(upload)) => Some(upload),
        _ => None,
    };
    let request = match job_request(&form, upload) {
        Ok(request) => request,
        Err(e) => {
            warn!(%job_id, "Rejected job parameters: {}", e);
            log.push(format!("Invalid job parameters: {e}"));
            log.push(JOB_FINISHED);
            return Ok(respond(job_id, started_at, &log));
        }
    };

    if let Some(upload) = upload {
        info!(%job_id, "Running '{}' job on upload '{}'", request.action, upload.original_name());
    } else {
        info!(%job_id, "Running '{}' job", request.action);
    }

    let jobs = Arc::clone(&state.jobs);
    let task_log = log.clone();
    let span = info_span!("job", %job_id);
    let outcome = tokio::spawn(async move { jobs.execute(&request, &task_log).await }.instrument(span)).await;

    if let Err(e) = outcome {
        error!(%job_id, "Job task failed: {}", e);
        log.push(format!("Unexpected server error: {e}"));
    }

    // Staged file is removed once the form goes out of scope.
    drop(form);
    Ok(respond(job_id, started_at, &log))
}

fn respond(job_id: Uuid, started_at: chrono::DateTime<Utc>, log: &JobLog) -> Json<ExecuteResponse> {
    Json(ExecuteResponse {
        message: COMPLETION_MESSAGE,
        report: JobReport {
            job_id,
            started_at,
            finished_at: Utc::now(),
            log: log.render(),
        },
    })
}

/// Build the CORS layer. `*` (the default) allows any origin; invalid origins are skipped.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    layer.allow_origin(origins)
}
