//! Kubernetes scale-subresource client.
//!
//! Issues a JSON merge patch against
//! `/apis/apps/v1/namespaces/{ns}/{resource}/{name}/scale` over plain
//! HTTP/1.1. Intended to talk to the API server through a local
//! `kubectl proxy` sidecar or any other plain-HTTP endpoint; an optional
//! bearer token is forwarded as-is.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use tracing::{debug, info};

use wakegate_core::WorkloadKey;
use wakegate_core::config::OrchestratorConfig;

use crate::Orchestrator;
use crate::error::{OrchestrationError, OrchestrationResult};

/// Client for the `apps/v1` scale subresource.
#[derive(Debug, Clone)]
pub struct KubeScaleClient {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix of the API base URL, without trailing slash.
    base_path: String,
    resource: String,
    token: Option<String>,
    timeout: Duration,
}

impl KubeScaleClient {
    pub fn new(
        api_url: &str,
        resource: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> OrchestrationResult<Self> {
        let uri: Uri = api_url
            .parse()
            .map_err(|e| OrchestrationError::Config(format!("api_url {api_url:?}: {e}")))?;

        match uri.scheme_str() {
            Some("http") | None => {}
            Some(other) => {
                return Err(OrchestrationError::Config(format!(
                    "unsupported scheme {other:?}; point api_url at a plain-HTTP proxy"
                )));
            }
        }

        let host = uri
            .host()
            .ok_or_else(|| OrchestrationError::Config(format!("api_url {api_url:?} has no host")))?;
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            address: format!("{host}:{port}"),
            base_path: uri.path().trim_end_matches('/').to_string(),
            resource: resource.to_string(),
            token,
            timeout,
        })
    }

    /// Build a client from the `[orchestrator]` config section.
    pub fn from_config(config: &OrchestratorConfig) -> OrchestrationResult<Self> {
        let timeout = config
            .request_timeout()
            .map_err(|e| OrchestrationError::Config(e.to_string()))?;
        let token = match &config.token_file {
            Some(path) => Some(read_token(path)?),
            None => None,
        };
        Self::new(&config.api_url, &config.resource, token, timeout)
    }

    /// Request path of the scale subresource for `key`.
    pub fn scale_path(&self, key: &WorkloadKey) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/{}/{}/scale",
            self.base_path, key.namespace, self.resource, key.name
        )
    }

    async fn patch(&self, path: &str, body: Vec<u8>) -> OrchestrationResult<(StatusCode, Bytes)> {
        let address = self.address.clone();
        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| OrchestrationError::Unavailable(format!("connect {address}: {e}")))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| OrchestrationError::Unavailable(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let mut builder = http::Request::builder()
                .method("PATCH")
                .uri(path)
                .header("host", &address)
                .header("content-type", "application/merge-patch+json")
                .header("accept", "application/json")
                .header("user-agent", "wakegate/0.1");
            if let Some(token) = &self.token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let req = builder
                .body(Full::new(Bytes::from(body)))
                .map_err(|e| OrchestrationError::Config(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| OrchestrationError::Unavailable(format!("request: {e}")))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            Ok::<_, OrchestrationError>((status, body))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                OrchestrationError::Unavailable(format!("timed out after {:?}", self.timeout))
            })?
    }
}

#[async_trait]
impl Orchestrator for KubeScaleClient {
    async fn set_replicas(&self, key: &WorkloadKey, replicas: u32) -> OrchestrationResult<()> {
        // Names are interpolated into the request path.
        key.validate()
            .map_err(|e| OrchestrationError::InvalidWorkload(e.to_string()))?;
        let path = self.scale_path(key);
        let body = serde_json::to_vec(&serde_json::json!({ "spec": { "replicas": replicas } }))
            .map_err(|e| OrchestrationError::Config(e.to_string()))?;

        debug!(workload = %key, replicas, %path, "patching scale subresource");
        let (status, body) = self.patch(&path, body).await?;
        classify(key, status, &body)?;

        info!(workload = %key, replicas, "replica count updated");
        Ok(())
    }
}

/// Map an API response status onto the orchestration error taxonomy.
fn classify(key: &WorkloadKey, status: StatusCode, body: &[u8]) -> OrchestrationResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let detail = format!("{key}: {status} {}", String::from_utf8_lossy(body).trim());
    match status {
        StatusCode::NOT_FOUND => Err(OrchestrationError::NotFound(detail)),
        StatusCode::CONFLICT => Err(OrchestrationError::Conflict(detail)),
        _ => Err(OrchestrationError::Unavailable(detail)),
    }
}

fn read_token(path: &Path) -> OrchestrationResult<String> {
    std::fs::read_to_string(path)
        .map(|t| t.trim().to_string())
        .map_err(|e| OrchestrationError::Config(format!("token file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn grafana() -> WorkloadKey {
        WorkloadKey::new("default", "grafana")
    }

    /// Serve one request with a canned status; returns the raw request text.
    async fn one_shot_api(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}"
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn scale_path_layout() {
        let client =
            KubeScaleClient::new("http://127.0.0.1:8001", "deployments", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.scale_path(&grafana()),
            "/apis/apps/v1/namespaces/default/deployments/grafana/scale"
        );
    }

    #[test]
    fn scale_path_keeps_base_prefix() {
        let client =
            KubeScaleClient::new("http://proxy:8080/k8s/", "statefulsets", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.address, "proxy:8080");
        assert_eq!(
            client.scale_path(&grafana()),
            "/k8s/apis/apps/v1/namespaces/default/statefulsets/grafana/scale"
        );
    }

    #[test]
    fn rejects_https() {
        let err = KubeScaleClient::new("https://10.0.0.1", "deployments", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[test]
    fn classify_statuses() {
        let key = grafana();
        assert!(classify(&key, StatusCode::OK, b"").is_ok());
        assert!(matches!(
            classify(&key, StatusCode::NOT_FOUND, b""),
            Err(OrchestrationError::NotFound(_))
        ));
        assert!(matches!(
            classify(&key, StatusCode::CONFLICT, b""),
            Err(OrchestrationError::Conflict(_))
        ));
        assert!(matches!(
            classify(&key, StatusCode::SERVICE_UNAVAILABLE, b"etcd down"),
            Err(OrchestrationError::Unavailable(msg)) if msg.contains("etcd down")
        ));
    }

    #[tokio::test]
    async fn patches_scale_subresource() {
        let (url, server) = one_shot_api("200 OK").await;
        let client = KubeScaleClient::new(
            &url,
            "deployments",
            Some("s3cret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        client.set_replicas(&grafana(), 1).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "PATCH /apis/apps/v1/namespaces/default/deployments/grafana/scale HTTP/1.1"
        ));
        assert!(request.to_lowercase().contains("content-type: application/merge-patch+json"));
        assert!(request.contains("Bearer s3cret"));
        assert!(request.contains(r#"{"spec":{"replicas":1}}"#));
    }

    #[tokio::test]
    async fn not_found_is_reported() {
        let (url, server) = one_shot_api("404 Not Found").await;
        let client = KubeScaleClient::new(&url, "deployments", None, Duration::from_secs(5)).unwrap();

        let err = client.set_replicas(&grafana(), 0).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::NotFound(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_names_never_reach_the_api() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = KubeScaleClient::new(
            &format!("http://{addr}"),
            "deployments",
            None,
            Duration::from_secs(2),
        )
        .unwrap();

        let key = WorkloadKey::new("kube-system", "coredns/scale?dryRun=All");
        let err = client.set_replicas(&key, 0).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidWorkload(_)));

        let accepted = tokio::time::timeout(Duration::from_millis(50), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = KubeScaleClient::new(
            &format!("http://{addr}"),
            "deployments",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.set_replicas(&grafana(), 1).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Unavailable(_)));
    }
}
