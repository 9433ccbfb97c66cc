use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use crate::domain::{
    error::BulkUpdateError,
    models::{BatchCommand, BatchOutcome, CommandError, Entity, WebhookBase},
    ports::CrmGateway,
};

pub const BATCH_METHOD: &str = "batch.json";

/// Talks to a Bitrix24-style REST webhook.
pub struct RestCrmGateway {
    client: Client,
    check_timeout: Duration,
    batch_timeout: Duration,
}

impl RestCrmGateway {
    pub fn new(check_timeout: Duration, batch_timeout: Duration) -> Self {
        debug!(
            "Initializing webhook gateway (check timeout {:?}, batch timeout {:?})",
            check_timeout, batch_timeout
        );
        Self {
            client: Client::new(),
            check_timeout,
            batch_timeout,
        }
    }
}

#[async_trait]
impl CrmGateway for RestCrmGateway {
    async fn check_webhook(&self, webhook: &WebhookBase, entity: &Entity) -> Result<(), BulkUpdateError> {
        let url = webhook.method_url(&entity.list_method())?;
        debug!("Probing webhook: {}", url);

        let response = self.client
            .get(url)
            .query(&[("start", "0"), ("select[]", "ID")])
            .timeout(self.check_timeout)
            .send()
            .await
            .map_err(|e| {
                error!("Webhook check failed for {}: {}", entity, e);
                BulkUpdateError::Http(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Webhook check for {} returned HTTP {}", entity, status);
            return Err(BulkUpdateError::InvalidWebhook {
                entity: entity.short_name().to_string(),
                status: status.as_u16(),
            });
        }

        info!("Webhook check succeeded for {}", entity);
        Ok(())
    }

    async fn send_batch(&self, webhook: &WebhookBase, command: &BatchCommand) -> Result<BatchOutcome, BulkUpdateError> {
        let url = webhook.method_url(BATCH_METHOD)?;
        debug!("Posting batch of {} commands to {}", command.len(), url);

        let response = self.client
            .post(url)
            .json(&command.body())
            .timeout(self.batch_timeout)
            .send()
            .await
            .map_err(|e| BulkUpdateError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| BulkUpdateError::Http(e.to_string()))?;

        // A 2xx body that is not JSON still counts as accepted.
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Batch response is not JSON: {}", e);
                Value::Null
            }
        };

        Ok(command_errors(command, &body))
    }
}

/// Picks per-command failures out of `result.result_error`, in command order.
fn command_errors(command: &BatchCommand, body: &Value) -> BatchOutcome {
    let Some(errors) = body["result"]["result_error"].as_object() else {
        return BatchOutcome::default();
    };

    let command_errors = command
        .entries()
        .iter()
        .filter_map(|entry| {
            errors.get(&entry.name).map(|detail| CommandError {
                name: entry.name.clone(),
                message: describe_error(detail),
            })
        })
        .collect();

    BatchOutcome { command_errors }
}

fn describe_error(detail: &Value) -> String {
    detail["error_description"]
        .as_str()
        .or_else(|| detail["error"].as_str())
        .or_else(|| detail.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FieldUpdate;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway() -> RestCrmGateway {
        RestCrmGateway::new(Duration::from_secs(2), Duration::from_secs(2))
    }

    fn webhook(server: &MockServer) -> WebhookBase {
        WebhookBase::parse(&format!("{}/rest/1/secret", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn webhook_check_accepts_http_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/1/secret/crm.contact.list"))
            .and(query_param("start", "0"))
            .and(query_param("select[]", "ID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": []})))
            .expect(1)
            .mount(&server)
            .await;

        let entity = Entity::parse("crm.contact").unwrap();
        gateway().check_webhook(&webhook(&server), &entity).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_check_rejects_other_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let entity = Entity::parse("crm.company").unwrap();
        let result = gateway().check_webhook(&webhook(&server), &entity).await;
        assert_matches!(
            result,
            Err(BulkUpdateError::InvalidWebhook { ref entity, status: 401 }) if entity == "company"
        );
    }

    #[tokio::test]
    async fn webhook_check_reports_transport_failure() {
        // Nothing listens on a port we bound and released.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let base = WebhookBase::parse(&format!("http://127.0.0.1:{port}/rest/1/secret")).unwrap();

        let entity = Entity::parse("crm.deal").unwrap();
        assert_matches!(gateway().check_webhook(&base, &entity).await, Err(BulkUpdateError::Http(_)));
    }

    #[tokio::test]
    async fn batch_posts_cmd_map_and_collects_command_errors() {
        let server = MockServer::start().await;
        let entity = Entity::parse("crm.contact").unwrap();
        let command = BatchCommand::build(&entity, &[1, 2, 3], &FieldUpdate::new("NAME", "Ana Maria"));

        Mock::given(method("POST"))
            .and(path("/rest/1/secret/batch.json"))
            .and(body_json(command.body()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "result": {"update_0": true, "update_2": true},
                    "result_error": {
                        "update_1": {"error": "NOT_FOUND", "error_description": "Not found"}
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = gateway().send_batch(&webhook(&server), &command).await.unwrap();
        assert_eq!(
            outcome.command_errors,
            vec![CommandError { name: "update_1".to_string(), message: "Not found".to_string() }]
        );
    }

    #[tokio::test]
    async fn batch_non_2xx_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let entity = Entity::parse("crm.contact").unwrap();
        let command = BatchCommand::build(&entity, &[1], &FieldUpdate::new("NAME", "x"));
        assert_matches!(
            gateway().send_batch(&webhook(&server), &command).await,
            Err(BulkUpdateError::Http(_))
        );
    }

    #[test]
    fn empty_result_error_array_is_clean() {
        let entity = Entity::parse("crm.contact").unwrap();
        let command = BatchCommand::build(&entity, &[1], &FieldUpdate::new("NAME", "x"));

        let outcome = command_errors(&command, &json!({"result": {"result_error": []}}));
        assert!(outcome.is_clean());
        assert!(command_errors(&command, &Value::Null).is_clean());
    }
}
