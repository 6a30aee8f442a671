//! HTTP/JSON implementation of [`RemoteGateway`].
//!
//! ```text
//! GET    /health
//! GET    /workspaces/{ws}/tables/{table}/records
//! POST   /workspaces/{ws}/tables/{table}/records
//! PATCH  /workspaces/{ws}/tables/{table}/records/{id}
//! DELETE /workspaces/{ws}/tables/{table}/records/{id}
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::RemoteGateway;
use crate::context::WorkspaceId;
use crate::error::GatewayError;
use crate::record::{Record, RecordId};

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn records_url(&self, workspace: &WorkspaceId, table: &str) -> String {
        format!(
            "{}/workspaces/{}/tables/{}/records",
            self.base_url,
            urlencoding::encode(workspace.as_str()),
            urlencoding::encode(table)
        )
    }

    fn record_url(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> String {
        format!(
            "{}/{}",
            self.records_url(workspace, table),
            urlencoding::encode(id.as_str())
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        debug!(status = status.as_u16(), %message, "Remote store returned an error");
        Err(classify_status(status, message))
    }
}

/// Maps a non-success HTTP status to a [`GatewayError`].
///
/// Server errors, timeouts and rate limiting may pass on their own and are
/// transient. Any other client error is a rejection.
pub fn classify_status(status: StatusCode, message: String) -> GatewayError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        GatewayError::Transient(format!("{}: {}", status, message))
    } else {
        GatewayError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

async fn decode_record(response: Response) -> Result<Record, GatewayError> {
    match response
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))?
    {
        Value::Object(record) => Ok(record),
        other => Err(GatewayError::Decode(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch(&self, workspace: &WorkspaceId, table: &str) -> Result<Vec<Record>, GatewayError> {
        let response = self
            .send(self.client.get(self.records_url(workspace, table)))
            .await?;
        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn insert(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        record: &Record,
    ) -> Result<Record, GatewayError> {
        let response = self
            .send(self.client.post(self.records_url(workspace, table)).json(record))
            .await?;
        // The insert has been applied remotely by now. Reporting a failure
        // would get it queued and replayed as a second record.
        match decode_record(response).await {
            Ok(stored) => Ok(stored),
            Err(GatewayError::Decode(e)) => {
                warn!(table, error = %e, "Insert accepted but response unreadable, keeping sent record");
                Ok(record.clone())
            }
            Err(e) => Err(e),
        }
    }

    async fn update(
        &self,
        workspace: &WorkspaceId,
        table: &str,
        id: &RecordId,
        patch: &Record,
    ) -> Result<Record, GatewayError> {
        let response = self
            .send(
                self.client
                    .patch(self.record_url(workspace, table, id))
                    .json(patch),
            )
            .await?;
        decode_record(response).await
    }

    async fn delete(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> Result<(), GatewayError> {
        self.send(self.client.delete(self.record_url(workspace, table, id)))
            .await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()).is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_retryable());

        match classify_status(StatusCode::UNPROCESSABLE_ENTITY, "litros < 0".into()) {
            GatewayError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "litros < 0");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!classify_status(StatusCode::NOT_FOUND, String::new()).is_retryable());
    }

    #[test]
    fn test_urls_are_encoded() {
        let gateway = HttpGateway::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:8080");
        let ws = WorkspaceId::new("fazenda boa");
        assert_eq!(
            gateway.records_url(&ws, "abastecimentos"),
            "http://localhost:8080/workspaces/fazenda%20boa/tables/abastecimentos/records"
        );
        assert_eq!(
            gateway.record_url(&ws, "abastecimentos", &RecordId::new("a/b")),
            "http://localhost:8080/workspaces/fazenda%20boa/tables/abastecimentos/records/a%2Fb"
        );
    }

    /// Serves one request with the given raw HTTP response.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_insert_with_unreadable_response_is_accepted() {
        let url = serve_once(
            "HTTP/1.1 201 Created\r\ncontent-type: text/plain\r\ncontent-length: 7\r\nconnection: close\r\n\r\ncreated",
        )
        .await;
        let gateway = HttpGateway::new(&url, Duration::from_secs(5)).unwrap();
        let record = serde_json::json!({"id": "temp-1", "litros": 50})
            .as_object()
            .cloned()
            .unwrap();

        let stored = gateway
            .insert(&WorkspaceId::new("fazenda-1"), "abastecimentos", &record)
            .await
            .unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_update_with_unreadable_response_fails() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
        )
        .await;
        let gateway = HttpGateway::new(&url, Duration::from_secs(5)).unwrap();
        let patch = serde_json::json!({"litros": 60}).as_object().cloned().unwrap();

        let err = gateway
            .update(
                &WorkspaceId::new("fazenda-1"),
                "abastecimentos",
                &RecordId::new("7"),
                &patch,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let gateway = HttpGateway::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = gateway
            .fetch(&WorkspaceId::new("fazenda-1"), "abastecimentos")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!gateway.health().await);
    }
}
