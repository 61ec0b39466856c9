//! Status pages, rendered in the format the proxy asked for.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Body formats the gateway can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Json,
    Text,
    Html,
}

impl PageFormat {
    /// Pick a format from an `X-Format` media type. Unknown types get HTML.
    pub fn negotiate(format: &str) -> Self {
        let essence = format
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => PageFormat::Json,
            "text/plain" => PageFormat::Text,
            _ => PageFormat::Html,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PageFormat::Json => "application/json",
            PageFormat::Text => "text/plain; charset=utf-8",
            PageFormat::Html => "text/html; charset=utf-8",
        }
    }
}

/// A status page for a fallback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusPage {
    #[serde(serialize_with = "serialize_code")]
    pub code: StatusCode,
    pub message: String,
    pub workload: Option<String>,
}

fn serialize_code<S: serde::Serializer>(code: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(code.as_u16())
}

impl StatusPage {
    pub fn not_found(code: StatusCode) -> Self {
        Self {
            code,
            message: "Page not found".to_string(),
            workload: None,
        }
    }

    /// The ordinary default-backend answer for `code`.
    pub fn for_code(code: StatusCode, workload: Option<String>) -> Self {
        let message = match code.canonical_reason() {
            Some(reason) => format!("{} {reason}", code.as_u16()),
            None => code.as_u16().to_string(),
        };
        Self {
            code,
            message,
            workload,
        }
    }

    pub fn waiting(workload: &str) -> Self {
        Self {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: format!(
                "App {workload} is waking up. It might take a few minutes, try again shortly."
            ),
            workload: Some(workload.to_string()),
        }
    }

    pub fn render(&self, format: PageFormat) -> Response {
        let body = match format {
            PageFormat::Json => serde_json::to_string(self).unwrap_or_default(),
            PageFormat::Text => format!("{}\n", self.message),
            PageFormat::Html => self.html(),
        };
        (
            self.code,
            [(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()))],
            body,
        )
            .into_response()
    }

    fn html(&self) -> String {
        let title = escape_html(self.code.canonical_reason().unwrap_or("Unavailable"));
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
             <body>\n<h1>{}</h1>\n<p>{}</p>\n</body>\n</html>\n",
            self.code.as_u16(),
            escape_html(&self.message)
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
