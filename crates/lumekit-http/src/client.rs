//! Pooled HTTP client bound to one lume API base URL.

use lumekit_core::{
    ClientConfig, LumeError, LumeResult, Method, RequestDescriptor, Response,
};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::classify::{Failure, classify, failure_from_reqwest};

/// Client for `http://localhost:<port>/<api_root>`.
///
/// Cloning shares the connection pool. No request is ever retried; a
/// dropped request future aborts the call.
#[derive(Debug, Clone)]
pub struct LumeClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
}

impl LumeClient {
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> LumeResult<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|e| {
            LumeError::invalid_config(format!("Invalid lume API URL {base_url:?}: {e}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(LumeError::invalid_config(format!(
                "Invalid lume API URL {base_url:?}"
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .map_err(|e| LumeError::unknown("Failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send one request.
    ///
    /// A 2xx with an empty body yields [`Response::NoContent`]; a 2xx with a
    /// body that is not JSON is an `Unknown` error.
    pub async fn request(&self, req: &RequestDescriptor) -> LumeResult<Response> {
        let operation = req.operation();
        debug!(
            operation = %operation,
            "Equivalent curl command:\n{}",
            req.to_curl(&self.base_url)
        );

        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.http.request(to_reqwest(req.method), url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&operation, failure_from_reqwest(&e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| classify(&operation, failure_from_reqwest(&e)))?;

        if !status.is_success() {
            debug!(
                operation = %operation,
                status = %status.as_u16(),
                response_text = %text,
                "lume API request failed"
            );
            return Err(classify(
                &operation,
                Failure::Status {
                    status: status.as_u16(),
                    body: text,
                },
            ));
        }

        if text.trim().is_empty() {
            return Ok(Response::NoContent);
        }
        serde_json::from_str::<Value>(&text)
            .map(Response::Json)
            .map_err(|e| LumeError::unknown(format!("Invalid JSON in response to {operation}"), e))
    }

    pub async fn get(&self, path: &str) -> LumeResult<Response> {
        self.request(&RequestDescriptor::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> LumeResult<Response> {
        let mut req = RequestDescriptor::post(path);
        req.body = body;
        self.request(&req).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> LumeResult<Response> {
        self.request(&RequestDescriptor::patch(path).with_body(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> LumeResult<Response> {
        self.request(&RequestDescriptor::delete(path)).await
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}
