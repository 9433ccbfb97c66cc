use std::path::Path;
use std::sync::Arc;
use tracing::{info, debug, error, warn};
use crate::application::batch_dispatcher::{BatchDispatcher, DispatchPlan};
use crate::domain::{
    error::BulkUpdateError,
    models::{Action, Entity, FieldUpdate, IdentifierList, JobLog, JobRequest, WebhookBase},
    ports::{CrmGateway, IdentifierReader},
};

/// Closing line of every job log, whatever path the job took.
pub const JOB_FINISHED: &str = "Job finished.";

pub struct JobService {
    reader: Arc<dyn IdentifierReader>,
    gateway: Arc<dyn CrmGateway>,
}

impl JobService {
    pub fn new(reader: Arc<dyn IdentifierReader>, gateway: Arc<dyn CrmGateway>) -> Self {
        Self { reader, gateway }
    }

    /// Runs one job to completion. Failures never escape: each one becomes a log
    /// line and ends the job early, and the closing line is always written.
    pub async fn execute(&self, request: &JobRequest, log: &JobLog) {
        log.push(format!(
            "Starting job for entity '{}' with action '{}'.",
            request.entity, request.action
        ));

        match &request.action {
            Action::Update => self.run_update(request, log).await,
            Action::Get | Action::Add => {
                warn!("Action '{}' requested but not implemented", request.action);
                log.push(format!(
                    "Action '{}' for entity '{}' is not implemented yet.",
                    request.action, request.entity
                ));
                log.push("No operation was executed.");
            }
            Action::Unknown(action) => {
                warn!("Unknown action requested: '{}'", action);
                log.push(format!("Unknown action '{action}'."));
            }
        }

        log.push(JOB_FINISHED);
    }

    async fn run_update(&self, request: &JobRequest, log: &JobLog) {
        // Step 1: Check job parameters
        debug!("Step 1: Checking update parameters");
        let (plan, path) = match prepare_update(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Rejected update parameters: {}", e);
                log.push(format!("Invalid job parameters: {e}"));
                return;
            }
        };

        // Step 2: Read identifiers. Runs before the webhook check so bad input never reaches the network.
        debug!("Step 2: Reading identifiers from {}", path.display());
        let ids = match self.read_identifiers(path).await {
            Ok(ids) => ids,
            Err(e @ BulkUpdateError::MissingIdColumn { .. }) | Err(e @ BulkUpdateError::EmptyIdentifierList) => {
                warn!("Spreadsheet rejected: {}", e);
                log.push(e.to_string());
                return;
            }
            Err(e) => {
                error!("Failed to read spreadsheet {}: {}", path.display(), e);
                log.push(format!("Error reading spreadsheet: {e}"));
                return;
            }
        };
        log.push(format!("Total records to update: {}", ids.len()));

        // Step 3: Check the webhook
        debug!("Step 3: Checking webhook {}", plan.webhook.as_str());
        match self.gateway.check_webhook(&plan.webhook, &plan.entity).await {
            Ok(()) => log.push(format!(
                "Webhook valid! Starting update of '{}'.",
                plan.entity.short_name()
            )),
            Err(e @ BulkUpdateError::InvalidWebhook { .. }) => {
                log.push(e.to_string());
                return;
            }
            Err(e) => {
                log.push(format!("Error testing webhook: {e}"));
                return;
            }
        }

        // Step 4: Dispatch batches
        debug!("Step 4: Dispatching {} identifiers", ids.len());
        let summary = BatchDispatcher::new(Arc::clone(&self.gateway))
            .dispatch(&plan, &ids, log)
            .await;

        info!(
            "✅ Update of {} finished - {} batches, {} failed, {} command errors",
            plan.entity, summary.batches, summary.failed, summary.command_errors
        );
    }

    async fn read_identifiers(&self, path: &Path) -> Result<IdentifierList, BulkUpdateError> {
        let ids = self.reader.read_identifiers(path).await?;
        if ids.is_empty() {
            return Err(BulkUpdateError::EmptyIdentifierList);
        }
        Ok(ids)
    }
}

fn prepare_update(request: &JobRequest) -> Result<(DispatchPlan, &Path), BulkUpdateError> {
    let webhook = WebhookBase::parse(&request.webhook_base)?;
    let entity = Entity::parse(&request.entity)?;

    let field_id = request
        .field_id
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| BulkUpdateError::Validation("field_id is required for update".to_string()))?;
    let new_value = request
        .new_value
        .as_deref()
        .ok_or_else(|| BulkUpdateError::Validation("new_value is required for update".to_string()))?;
    let path = request
        .file_path
        .as_deref()
        .ok_or_else(|| BulkUpdateError::Validation("a spreadsheet file is required for update".to_string()))?;

    let plan = DispatchPlan {
        webhook,
        entity,
        batch_size: request.batch_size,
        delay: request.delay,
        update: FieldUpdate::new(field_id, new_value),
    };
    Ok((plan, path))
}
