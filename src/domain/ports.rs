use std::path::Path;

use async_trait::async_trait;
use crate::domain::{
    error::BulkUpdateError,
    models::{BatchCommand, BatchOutcome, Entity, IdentifierList, WebhookBase},
};

#[async_trait]
pub trait IdentifierReader: Send + Sync {
    async fn read_identifiers(&self, path: &Path) -> Result<IdentifierList, BulkUpdateError>;
}

#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Cheap read-only call; `Ok` only when the remote answers HTTP 200.
    async fn check_webhook(&self, webhook: &WebhookBase, entity: &Entity) -> Result<(), BulkUpdateError>;

    async fn send_batch(&self, webhook: &WebhookBase, command: &BatchCommand) -> Result<BatchOutcome, BulkUpdateError>;
}
