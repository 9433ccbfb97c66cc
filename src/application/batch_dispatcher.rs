use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use crate::domain::{
    models::{BatchCommand, BatchSize, Entity, FieldUpdate, IdentifierList, JobLog, WebhookBase},
    ports::CrmGateway,
};

/// Everything one dispatch run needs besides the identifiers.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub webhook: WebhookBase,
    pub entity: Entity,
    pub batch_size: BatchSize,
    pub delay: Duration,
    pub update: FieldUpdate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub command_errors: usize,
}

pub struct BatchDispatcher {
    gateway: Arc<dyn CrmGateway>,
}

impl BatchDispatcher {
    pub fn new(gateway: Arc<dyn CrmGateway>) -> Self {
        Self { gateway }
    }

    /// Sends one composite request per window, strictly in order. A failed batch is
    /// logged and skipped; it is never retried and never stops later batches.
    pub async fn dispatch(&self, plan: &DispatchPlan, ids: &IdentifierList, log: &JobLog) -> DispatchSummary {
        let total = ids.batch_count(plan.batch_size);
        let mut summary = DispatchSummary::default();
        info!(
            "Dispatching {} identifiers in {} batches of up to {} (delay {:?})",
            ids.len(), total, plan.batch_size.get(), plan.delay
        );

        for (index, window) in ids.batches(plan.batch_size).enumerate() {
            let number = index + 1;
            let command = BatchCommand::build(&plan.entity, window, &plan.update);
            log.push(format!(">> Sending batch {number}/{total} ({} records)...", command.len()));
            summary.batches += 1;

            match self.gateway.send_batch(&plan.webhook, &command).await {
                Ok(outcome) if outcome.is_clean() => {
                    summary.succeeded += 1;
                    log.push("Batch processed.");
                }
                Ok(outcome) => {
                    summary.succeeded += 1;
                    summary.command_errors += outcome.command_errors.len();
                    warn!("Batch {} had {} command errors", number, outcome.command_errors.len());
                    log.push(format!(
                        "Batch processed with {} command error(s):",
                        outcome.command_errors.len()
                    ));
                    for failure in &outcome.command_errors {
                        log.push(format!("  {}: {}", failure.name, failure.message));
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Batch {} failed: {}", number, e);
                    log.push(format!("Critical error sending batch {number}: {e}"));
                }
            }

            if number < total && !plan.delay.is_zero() {
                debug!("Sleeping {:?} before batch {}", plan.delay, number + 1);
                tokio::time::sleep(plan.delay).await;
            }
        }

        log.push(format!(
            "Batches: {} succeeded, {} failed.",
            summary.succeeded, summary.failed
        ));
        summary
    }
}
