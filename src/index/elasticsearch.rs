//! Elasticsearch-compatible bulk backend
//!
//! Sends one `_bulk` request per chunk using `index` actions, which create or
//! replace the document stored under the given `_id`.

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use super::{BackendError, BulkRequest, IndexBackend, ItemOutcome};
use crate::config::IndexSettings;
use crate::records::IndexRecord;

/// Longest response body kept in a status error
const MAX_ERROR_BODY: usize = 512;

/// Blocking client for a search service's bulk API
///
/// Owns a small tokio runtime; callers on any thread block on it, so the
/// backend can be shared by the writer's worker threads.
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    runtime: Runtime,
    base_url: String,
}

impl ElasticsearchBackend {
    pub fn new(settings: &IndexSettings) -> Result<Self, BackendError> {
        let base_url = endpoint_url(&settings.endpoint_url, settings.use_tls)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .danger_accept_invalid_certs(!settings.verify_certs)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("index-http")
            .enable_all()
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create tokio runtime: {}", e)))?;

        info!("Index backend at {}", base_url);
        Ok(Self {
            client,
            runtime,
            base_url,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_bulk(&self, body: String) -> Result<Vec<ItemOutcome>, BackendError> {
        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), text));
        }

        parse_bulk_response(&text)
    }

    async fn send_count(&self, index: &str) -> Result<u64, BackendError> {
        // Make recent writes visible before counting
        let refresh = self
            .client
            .post(format!("{}/{}/_refresh", self.base_url, index))
            .send()
            .await
            .map_err(transport)?;
        if !refresh.status().is_success() {
            let status = refresh.status().as_u16();
            let body = refresh.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let response = self
            .client
            .get(format!("{}/{}/_count", self.base_url, index))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), text));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| BackendError::InvalidResponse("missing count".into()))
    }
}

impl IndexBackend for ElasticsearchBackend {
    fn bulk_upsert(&self, request: &BulkRequest<'_>) -> Result<Vec<ItemOutcome>, BackendError> {
        if request.records.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(request.records)?;
        debug!(
            "Bulk request {}: {} records, {} bytes",
            request.sequence,
            request.records.len(),
            body.len()
        );

        self.runtime.block_on(self.send_bulk(body))
    }

    fn count(&self, index: &str) -> Result<u64, BackendError> {
        self.runtime.block_on(self.send_count(index))
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

fn status_error(status: u16, mut body: String) -> BackendError {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    BackendError::Status { status, body }
}

/// Normalize an endpoint into a base URL
///
/// A bare `host:port` gets `https://` or `http://` depending on `use_tls`.
pub fn endpoint_url(endpoint: &str, use_tls: bool) -> Result<String, BackendError> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(BackendError::Config("endpoint is empty".into()));
    }

    if endpoint.contains("://") {
        Ok(endpoint.to_string())
    } else {
        let scheme = if use_tls { "https" } else { "http" };
        Ok(format!("{}://{}", scheme, endpoint))
    }
}

/// NDJSON body for a bulk request: an action line and a source line per record
pub fn bulk_body(records: &[IndexRecord]) -> Result<String, BackendError> {
    let mut body = String::new();
    for record in records {
        let action = json!({ "index": { "_index": record.index, "_id": record.id } });
        let document = record
            .to_document()
            .map_err(|e| BackendError::InvalidResponse(format!("cannot encode {}: {}", record.id, e)))?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&document.to_string());
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// Per-item outcomes of a bulk response, in request order
pub fn parse_bulk_response(body: &str) -> Result<Vec<ItemOutcome>, BackendError> {
    let response: BulkResponse =
        serde_json::from_str(body).map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    response
        .items
        .into_iter()
        .map(|item| {
            let item = item
                .into_values()
                .next()
                .ok_or_else(|| BackendError::InvalidResponse("empty bulk item".into()))?;
            let error = match item.error {
                Some(error) => Some(describe_error(&error)),
                None if item.status >= 300 => Some(format!("status {}", item.status)),
                None => None,
            };
            Ok(ItemOutcome {
                id: item.id,
                status: item.status,
                error,
            })
        })
        .collect()
}

fn describe_error(error: &Value) -> String {
    match (
        error.get("type").and_then(Value::as_str),
        error.get("reason").and_then(Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BulkIndexWriter, WriteOptions};
    use crate::ocr::{Detection, DocumentResult};
    use crate::records::RecordBuilder;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn records(count: usize) -> Vec<IndexRecord> {
        let results = vec![DocumentResult {
            document_name: "invoice.pdf".to_string(),
            page_number: 2,
            detections: (0..count)
                .map(|i| Detection {
                    boxes: [(i as i32, 0), (10, 0), (10, 10), (0, 10)],
                    text: format!("line {}", i),
                    confidence: 0.9,
                })
                .collect(),
        }];
        RecordBuilder::new("run-1", "4", "ocr-results")
            .records(&results)
            .collect()
    }

    fn settings(endpoint: String) -> IndexSettings {
        IndexSettings {
            endpoint_url: endpoint,
            request_timeout_secs: 5,
            ..IndexSettings::default()
        }
    }

    /// Serve one HTTP request with a canned JSON body, handing back the request body
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }

            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.len(),
                response
            )
            .unwrap();
            stream.flush().unwrap();

            String::from_utf8(body).unwrap()
        });

        (address.to_string(), handle)
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("localhost:9200", false).unwrap(), "http://localhost:9200");
        assert_eq!(endpoint_url("localhost:9200/", true).unwrap(), "https://localhost:9200");
        assert_eq!(
            endpoint_url("https://search.internal:9243", false).unwrap(),
            "https://search.internal:9243"
        );
        assert!(endpoint_url("  ", false).is_err());
    }

    #[test]
    fn test_bulk_body_pairs_action_and_source() {
        let batch = records(2);
        let body = bulk_body(&batch).unwrap();
        assert!(body.ends_with('\n'));

        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);

        assert_eq!(lines[0]["index"]["_index"], "ocr-results");
        assert_eq!(lines[0]["index"]["_id"], batch[0].id.as_str());
        assert_eq!(lines[1]["text"], "line 0");
        assert_eq!(lines[1]["ocr_model_version"], "4");
        assert_eq!(lines[3]["detection_index"], 1);
    }

    #[test]
    fn test_parse_bulk_response() {
        let body = r#"{
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_index": "ocr-results", "_id": "a", "status": 201}},
                {"index": {"_index": "ocr-results", "_id": "b", "status": 200}},
                {"index": {"_index": "ocr-results", "_id": "c", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [boxes]"}}},
                {"index": {"_index": "ocr-results", "_id": "d", "status": 429}}
            ]
        }"#;

        let outcomes = parse_bulk_response(body).unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        assert_eq!(
            outcomes[2].error.as_deref(),
            Some("mapper_parsing_exception: failed to parse field [boxes]")
        );
        assert!(!outcomes[3].is_success());
        assert_eq!(outcomes[3].error.as_deref(), Some("status 429"));
    }

    #[test]
    fn test_parse_bulk_response_rejects_garbage() {
        assert!(matches!(
            parse_bulk_response("<html>gateway timeout</html>"),
            Err(BackendError::InvalidResponse(_))
        ));
        assert!(parse_bulk_response(r#"{"items": [{}]}"#).is_err());
    }

    #[test]
    fn test_status_error_truncates_body() {
        let error = status_error(502, "x".repeat(4 * MAX_ERROR_BODY));
        match error {
            BackendError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bulk_upsert_against_server() {
        let batch = records(2);
        let (address, server) = serve_once(
            r#"{"errors":true,"items":[{"index":{"_id":"x","status":201}},{"index":{"_id":"y","status":400,"error":{"type":"illegal_argument_exception","reason":"bad"}}}]}"#,
        );

        let backend = ElasticsearchBackend::new(&settings(address)).unwrap();
        let outcomes = backend
            .bulk_upsert(&BulkRequest {
                sequence: 0,
                records: &batch,
            })
            .unwrap();

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[1].error.as_deref(), Some("illegal_argument_exception: bad"));

        let sent = server.join().unwrap();
        assert_eq!(sent, bulk_body(&batch).unwrap());
    }

    #[test]
    fn test_unreachable_endpoint_fails_every_record() {
        // Bind then release a port so nothing is listening on it
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let backend = ElasticsearchBackend::new(&settings(address)).unwrap();
        let writer = BulkIndexWriter::new(
            backend,
            WriteOptions {
                chunk_size: 2,
                concurrency: 2,
                queue_size: 1,
            },
        );

        let errors = writer.write(records(5));
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().all(|e| e.status.is_none()));
    }
}
