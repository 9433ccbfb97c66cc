use std::collections::HashMap;
use std::path::Path;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;

use crm_bulk_update::config::ServerConfig;
use crm_bulk_update::http_service::{router, AppState};

pub const BOUNDARY: &str = "crm-bulk-update-test-boundary";

/// Build the application router the way `main.rs` does, staging uploads in `upload_dir`.
pub fn build_test_app(upload_dir: &Path) -> Router {
    let vars: HashMap<&str, String> = HashMap::from([
        ("UPLOAD_DIR", upload_dir.display().to_string()),
        ("WEBHOOK_CHECK_TIMEOUT_SECS", "2".to_string()),
        ("BATCH_TIMEOUT_SECS", "2".to_string()),
    ]);
    let config = ServerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    router(AppState::from_config(config))
}

/// Hand-rolled `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(content);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// CSV with an `ID` column holding `1..=count`.
pub fn id_csv(count: i64) -> Vec<u8> {
    let mut csv = String::from("Name,ID\n");
    for id in 1..=count {
        csv.push_str(&format!("record-{id},{id}\n"));
    }
    csv.into_bytes()
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
