//! Reverse-proxy fallback request metadata.
//!
//! The proxy forwards a failed request's context as headers (the
//! ingress-nginx custom error contract). This module pulls those out and
//! rebuilds the URL the client originally asked for.

use axum::http::{HeaderMap, StatusCode};
use tracing::debug;

use wakegate_core::WorkloadKey;
use wakegate_core::config::WorkloadHeader;

pub const CODE_HEADER: &str = "x-code";
pub const FORMAT_HEADER: &str = "x-format";
pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";
pub const NAMESPACE_HEADER: &str = "x-namespace";
pub const INGRESS_NAME_HEADER: &str = "x-ingress-name";
pub const SERVICE_NAME_HEADER: &str = "x-service-name";
pub const SERVICE_PORT_HEADER: &str = "x-service-port";

/// Everything the gateway reads from one fallback request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackRequest {
    pub code: Option<StatusCode>,
    pub format: Option<String>,
    pub original_uri: Option<String>,
    pub namespace: Option<String>,
    pub ingress_name: Option<String>,
    pub service_name: Option<String>,
    pub service_port: Option<String>,
    pub scheme: Option<String>,
    pub host: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl FallbackRequest {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let code = header(headers, CODE_HEADER)
            .and_then(|c| c.parse::<u16>().ok())
            .and_then(|c| StatusCode::from_u16(c).ok());

        Self {
            code,
            format: header(headers, FORMAT_HEADER),
            original_uri: header(headers, ORIGINAL_URI_HEADER),
            namespace: header(headers, NAMESPACE_HEADER),
            ingress_name: header(headers, INGRESS_NAME_HEADER),
            service_name: header(headers, SERVICE_NAME_HEADER),
            service_port: header(headers, SERVICE_PORT_HEADER),
            scheme: header(headers, "x-forwarded-proto").or_else(|| header(headers, "x-scheme")),
            host: header(headers, "x-forwarded-host").or_else(|| header(headers, "host")),
        }
    }

    /// Status the proxy reported for the failed request, 404 if absent.
    pub fn status(&self) -> StatusCode {
        self.code.unwrap_or(StatusCode::NOT_FOUND)
    }

    /// The workload the request was meant for, named by `source`.
    ///
    /// Names that are not valid Kubernetes object names are treated as
    /// absent.
    pub fn workload_key(&self, source: WorkloadHeader) -> Option<WorkloadKey> {
        let name = match source {
            WorkloadHeader::Ingress => self.ingress_name.as_ref(),
            WorkloadHeader::Service => self.service_name.as_ref(),
        }?;
        let namespace = self.namespace.as_ref()?;
        match WorkloadKey::parse(namespace.as_str(), name.as_str()) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(error = %e, "ignoring fallback workload headers");
                None
            }
        }
    }

    /// Rebuild the URL the client originally requested.
    ///
    /// Absolute when a host is known, otherwise a path-only reference the
    /// client resolves against the host it already used.
    pub fn original_url(&self) -> String {
        let uri = self.original_uri.as_deref().unwrap_or("/");
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return uri.to_string();
        }
        let path = if uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{uri}")
        };

        match &self.host {
            Some(host) => {
                let scheme = self.scheme.as_deref().unwrap_or("http");
                format!("{scheme}://{host}{path}")
            }
            None => path,
        }
    }

    pub fn log_headers(&self) {
        debug!(
            code = ?self.code,
            format = ?self.format,
            original_uri = ?self.original_uri,
            namespace = ?self.namespace,
            ingress_name = ?self.ingress_name,
            service_name = ?self.service_name,
            service_port = ?self.service_port,
            scheme = ?self.scheme,
            host = ?self.host,
            "fallback request headers"
        );
    }
}
