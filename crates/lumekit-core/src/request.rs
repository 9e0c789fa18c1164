//! Transport-neutral request description.
//!
//! The facade and endpoint builders produce [`RequestDescriptor`]s; the
//! HTTP client turns them into real requests. Nothing here knows what a VM is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// HTTP methods the lume API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API call: method, path relative to the API root, optional JSON
/// body, query pairs, and an optional per-call timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path under the API root, starting with `/` (e.g. `/vms/dev`).
    pub path: String,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    /// Overrides the client's total timeout for this call only.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Create a descriptor with no body, query, or timeout override.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            method,
            path,
            body: None,
            query: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the total timeout for this call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Short label used in error messages and logs, e.g. `GET /vms`.
    #[must_use]
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// Render the equivalent `curl` invocation against `base_url`.
    #[must_use]
    pub fn to_curl(&self, base_url: &str) -> String {
        let mut url = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        if !self.query.is_empty() {
            let pairs: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            url.push('?');
            url.push_str(&pairs.join("&"));
        }

        let mut cmd = format!("curl -X {} \\\n  '{url}'", self.method);
        if let Some(body) = &self.body {
            cmd.push_str(&format!(
                " \\\n  -H 'Content-Type: application/json' \\\n  -d '{body}'"
            ));
        }
        cmd
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// 2xx with a JSON body.
    Json(Value),
    /// 2xx with an empty body.
    NoContent,
}

impl Response {
    /// The JSON payload, if any.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::NoContent => None,
        }
    }

    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::NoContent => None,
        }
    }

    #[must_use]
    pub const fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_gets_leading_slash() {
        assert_eq!(RequestDescriptor::get("vms").path, "/vms");
        assert_eq!(RequestDescriptor::get("/vms").path, "/vms");
    }

    #[test]
    fn test_operation_label() {
        let req = RequestDescriptor::delete("/vms/dev");
        assert_eq!(req.operation(), "DELETE /vms/dev");
    }

    #[test]
    fn test_curl_includes_body_and_query() {
        let req = RequestDescriptor::post("/pull")
            .with_body(json!({"image": "macos-sequoia-vanilla:latest"}))
            .with_query("organization", "trycua");
        let curl = req.to_curl("http://localhost:7777/lume/");

        assert!(curl.starts_with("curl -X POST"));
        assert!(curl.contains("'http://localhost:7777/lume/pull?organization=trycua'"));
        assert!(curl.contains("Content-Type: application/json"));
        assert!(curl.contains("macos-sequoia-vanilla:latest"));
    }

    #[test]
    fn test_curl_without_body_has_no_header() {
        let curl = RequestDescriptor::get("/vms").to_curl("http://localhost:7777/lume");
        assert!(!curl.contains("Content-Type"));
    }

    #[test]
    fn test_no_content_is_distinct_from_empty_object() {
        let empty = Response::Json(json!({}));
        assert!(!empty.is_no_content());
        assert_eq!(empty.json(), Some(&json!({})));
        assert!(Response::NoContent.is_no_content());
        assert_eq!(Response::NoContent.into_json(), None);
    }
}
