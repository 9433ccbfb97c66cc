use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::domain::error::BulkUpdateError;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_DELAY_SECS: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Update,
    Get,
    Add,
    Unknown(String),
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "update" => Self::Update,
            "get" => Self::Get,
            "add" => Self::Add,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => f.write_str("update"),
            Self::Get => f.write_str("get"),
            Self::Add => f.write_str("add"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Dot-qualified remote record type, e.g. `crm.contact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity(String);

fn entity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)+$").expect("entity pattern is valid")
    })
}

impl Entity {
    pub fn parse(raw: &str) -> Result<Self, BulkUpdateError> {
        let raw = raw.trim();
        if !entity_pattern().is_match(raw) {
            return Err(BulkUpdateError::Validation(format!(
                "entity '{raw}' must be dot-qualified, e.g. 'crm.contact'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final segment of the qualified name (`contact` for `crm.contact`).
    pub fn short_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    pub fn list_method(&self) -> String {
        format!("{}.list", self.0)
    }

    pub fn update_method(&self) -> String {
        format!("{}.update", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Root URL of the remote API. Always ends with `/` so methods can be joined onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookBase(Url);

impl WebhookBase {
    pub fn parse(raw: &str) -> Result<Self, BulkUpdateError> {
        let mut normalized = raw.trim().to_string();
        if normalized.is_empty() {
            return Err(BulkUpdateError::Validation("webhook base URL is required".to_string()));
        }
        if !normalized.ends_with('/') {
            normalized.push('/');
        }

        let url = Url::parse(&normalized)
            .map_err(|e| BulkUpdateError::Validation(format!("invalid webhook URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BulkUpdateError::Validation(format!(
                "webhook URL '{raw}' must use http or https"
            )));
        }
        Ok(Self(url))
    }

    pub fn method_url(&self, method: &str) -> Result<Url, BulkUpdateError> {
        self.0
            .join(method)
            .map_err(|e| BulkUpdateError::Validation(format!("invalid method '{method}': {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub fn new(size: usize) -> Result<Self, BulkUpdateError> {
        NonZeroUsize::new(size)
            .map(Self)
            .ok_or_else(|| BulkUpdateError::Validation("batch size must be at least 1".to_string()))
    }

    /// Parses a form value. Zero and negative sizes are rejected outright.
    pub fn parse(raw: &str) -> Result<Self, BulkUpdateError> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| BulkUpdateError::Validation(format!("batch size '{raw}' is not an integer")))?;
        if value < 1 {
            return Err(BulkUpdateError::Validation(format!(
                "batch size must be at least 1, got {value}"
            )));
        }
        Self::new(value as usize)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

pub fn parse_delay(raw: &str) -> Result<Duration, BulkUpdateError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| BulkUpdateError::Validation(format!("delay '{raw}' is not a number")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(BulkUpdateError::Validation(format!(
            "delay must be a non-negative number of seconds, got {raw}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| BulkUpdateError::Validation(format!("delay {raw} is out of range: {e}")))
}

pub fn default_delay() -> Duration {
    Duration::from_secs_f64(DEFAULT_DELAY_SECS)
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub webhook_base: String,
    pub entity: String,
    pub action: Action,
    pub batch_size: BatchSize,
    pub delay: Duration,
    pub field_id: Option<String>,
    pub new_value: Option<String>,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierList(Vec<i64>);

impl IdentifierList {
    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Contiguous, non-overlapping windows in original order; the last may be shorter.
    pub fn batches(&self, size: BatchSize) -> std::slice::Chunks<'_, i64> {
        self.0.chunks(size.get())
    }

    pub fn batch_count(&self, size: BatchSize) -> usize {
        self.0.len().div_ceil(size.get())
    }
}

impl From<Vec<i64>> for IdentifierList {
    fn from(ids: Vec<i64>) -> Self {
        Self(ids)
    }
}

/// Field assignment shared by every command of a job. The value is encoded once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field_id: String,
    pub encoded_value: String,
}

impl FieldUpdate {
    pub fn new(field_id: &str, value: &str) -> Self {
        Self {
            field_id: field_id.trim().to_string(),
            encoded_value: url::form_urlencoded::byte_serialize(value.as_bytes()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub name: String,
    pub identifier: i64,
    pub query: String,
}

/// One composite request: `update_<i>` names are positional within the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCommand {
    entries: Vec<BatchEntry>,
}

impl BatchCommand {
    pub fn build(entity: &Entity, ids: &[i64], update: &FieldUpdate) -> Self {
        let method = entity.update_method();
        let entries = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| BatchEntry {
                name: format!("update_{idx}"),
                identifier: *id,
                query: format!(
                    "{method}?id={id}&fields[{}]={}",
                    update.field_id, update.encoded_value
                ),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identifiers(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.identifier).collect()
    }

    pub fn body(&self) -> Value {
        let cmd: Map<String, Value> = self
            .entries
            .iter()
            .map(|e| (e.name.clone(), Value::String(e.query.clone())))
            .collect();
        json!({ "cmd": cmd })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub name: String,
    pub message: String,
}

/// Result of a batch the remote accepted with a 2xx status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub command_errors: Vec<CommandError>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.command_errors.is_empty()
    }
}

/// Append-only job log. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "job_log", "{}", line);
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    pub fn render(&self) -> String {
        self.lines().iter().map(|line| format!("{line}\n")).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn entity_requires_dot_qualified_name() {
        let entity = Entity::parse(" crm.contact ").unwrap();
        assert_eq!(entity.as_str(), "crm.contact");
        assert_eq!(entity.short_name(), "contact");
        assert_eq!(entity.list_method(), "crm.contact.list");
        assert_eq!(entity.update_method(), "crm.contact.update");

        assert_matches!(Entity::parse("contact"), Err(BulkUpdateError::Validation(_)));
        assert_matches!(Entity::parse("crm."), Err(BulkUpdateError::Validation(_)));
        assert_matches!(Entity::parse("crm.contact?x=1"), Err(BulkUpdateError::Validation(_)));
    }

    #[test]
    fn webhook_base_gets_trailing_slash() {
        let base = WebhookBase::parse("https://example.bitrix24.com/rest/1/token").unwrap();
        assert_eq!(base.as_str(), "https://example.bitrix24.com/rest/1/token/");
        assert_eq!(
            base.method_url("batch.json").unwrap().as_str(),
            "https://example.bitrix24.com/rest/1/token/batch.json"
        );

        assert_matches!(WebhookBase::parse(""), Err(BulkUpdateError::Validation(_)));
        assert_matches!(WebhookBase::parse("ftp://host/rest/"), Err(BulkUpdateError::Validation(_)));
        assert_matches!(WebhookBase::parse("not a url"), Err(BulkUpdateError::Validation(_)));
    }

    #[test]
    fn batch_size_rejects_zero_and_negative() {
        assert_eq!(BatchSize::parse("25").unwrap().get(), 25);
        assert_eq!(BatchSize::default().get(), DEFAULT_BATCH_SIZE);
        assert_matches!(BatchSize::parse("0"), Err(BulkUpdateError::Validation(_)));
        assert_matches!(BatchSize::parse("-3"), Err(BulkUpdateError::Validation(_)));
        assert_matches!(BatchSize::parse("ten"), Err(BulkUpdateError::Validation(_)));
    }

    #[test]
    fn delay_must_be_finite_and_non_negative() {
        assert_eq!(parse_delay("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_delay("0").unwrap(), Duration::ZERO);
        assert!(parse_delay("-1").is_err());
        assert!(parse_delay("NaN").is_err());
        assert!(parse_delay("soon").is_err());
    }

    #[test]
    fn huge_delay_is_rejected_without_panicking() {
        assert_matches!(parse_delay("1e20"), Err(BulkUpdateError::Validation(_)));
        assert_matches!(parse_delay("1e300"), Err(BulkUpdateError::Validation(_)));
    }

    #[test]
    fn action_parsing_keeps_unknown_keyword() {
        assert_eq!(Action::parse("update"), Action::Update);
        assert_eq!(Action::parse("get"), Action::Get);
        assert_eq!(Action::parse("add"), Action::Add);
        assert_eq!(Action::parse("delete"), Action::Unknown("delete".to_string()));
        assert_eq!(Action::parse("delete").to_string(), "delete");
    }

    #[test]
    fn partitioning_preserves_order_and_sizes() {
        for len in [0usize, 1, 49, 50, 51, 120, 257] {
            for size in [1usize, 7, 50, 300] {
                let ids: Vec<i64> = (0..len as i64).map(|i| i * 3 - 5).collect();
                let list = IdentifierList::from(ids.clone());
                let batch_size = BatchSize::new(size).unwrap();

                let batches: Vec<&[i64]> = list.batches(batch_size).collect();
                assert_eq!(batches.len(), len.div_ceil(size));
                assert_eq!(list.batch_count(batch_size), batches.len());

                if let Some((last, full)) = batches.split_last() {
                    assert!(full.iter().all(|b| b.len() == size));
                    assert!(!last.is_empty() && last.len() <= size);
                }
                assert_eq!(batches.concat(), ids);
            }
        }
    }

    #[test]
    fn batch_command_names_are_positional() {
        let entity = Entity::parse("crm.deal").unwrap();
        let update = FieldUpdate::new("UF_CRM_STATUS", "Won / closed");
        let command = BatchCommand::build(&entity, &[11, 11, 42], &update);

        assert_eq!(command.len(), 3);
        assert_eq!(command.identifiers(), vec![11, 11, 42]);
        assert_eq!(
            command.body(),
            json!({
                "cmd": {
                    "update_0": "crm.deal.update?id=11&fields[UF_CRM_STATUS]=Won+%2F+closed",
                    "update_1": "crm.deal.update?id=11&fields[UF_CRM_STATUS]=Won+%2F+closed",
                    "update_2": "crm.deal.update?id=42&fields[UF_CRM_STATUS]=Won+%2F+closed",
                }
            })
        );
    }

    #[test]
    fn job_log_clones_share_lines() {
        let log = JobLog::new();
        let handle = log.clone();
        log.push("first");
        handle.push("second");

        assert_eq!(log.lines(), vec!["first", "second"]);
        assert_eq!(log.render(), "first\nsecond\n");
        assert!(log.contains("sec"));
    }
}
