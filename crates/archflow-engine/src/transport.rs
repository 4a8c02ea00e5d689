use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use archflow_contracts::classify::classify_html;
use archflow_contracts::credentials::{ApiKey, CredentialProvider};
use archflow_contracts::{ErrorCategory, JobError};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Create,
    Check,
    Upscale,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Create => "/flow-create",
            Self::Check => "/flow-check",
            Self::Upscale => "/flow-upscale",
        }
    }
}

/// One JSON POST against the Flow backend. Implementations return the
/// parsed body or an already-classified [`JobError`].
pub trait FlowTransport: Send + Sync {
    fn call(&self, endpoint: Endpoint, payload: &Value) -> Result<Value, JobError>;
}

pub struct HttpTransport {
    api_base: String,
    http: HttpClient,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(
        api_base: &str,
        request_timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build Flow HTTP client")?;
        Ok(Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            http,
            credentials,
        })
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.api_base, endpoint.path())
    }
}

impl HttpTransport {
    /// Runs one exchange with a fresh key and reports the key as rejected
    /// when the backend answers with an auth or captcha block.
    fn exchange<F>(&self, send: F) -> Result<Value, JobError>
    where
        F: FnOnce(&ApiKey) -> Result<(u16, String), JobError>,
    {
        let key = self.credentials.api_key()?;
        let (status, body) = send(&key)?;
        let result = interpret_response(status, &body);
        if let Err(err) = &result {
            if matches!(
                err.category(),
                Some(ErrorCategory::Auth | ErrorCategory::Captcha)
            ) {
                self.credentials.report_rejected(&key);
            }
        }
        result
    }
}

impl FlowTransport for HttpTransport {
    fn call(&self, endpoint: Endpoint, payload: &Value) -> Result<Value, JobError> {
        let url = self.endpoint_url(endpoint);
        self.exchange(|key| {
            let response = self
                .http
                .post(&url)
                .bearer_auth(key.secret())
                .json(payload)
                .send()
                .map_err(|err| transport_error(&url, err))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .map_err(|err| transport_error(&url, err))?;
            Ok((status, body))
        })
    }
}

/// Shared response handling: HTML sniffing, JSON parsing and non-2xx
/// mapping. A 2xx body is returned as-is; task-level `status: "failed"`
/// markers are terminal states and left to the submitter and poller.
pub fn interpret_response(status: u16, body: &str) -> Result<Value, JobError> {
    if let Some(category) = classify_html(status, body) {
        return Err(JobError::categorized(
            category,
            format!("HTTP {status}: HTML error page"),
        ));
    }

    let success = (200..300).contains(&status);
    let parsed: Value = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) if success => {
            return Err(JobError::InvalidPayload {
                message: format!("invalid JSON body: {err}"),
            });
        }
        Err(_) => return Err(JobError::from_http_failure(status, body)),
    };

    if !success {
        let message = payload_error_text(&parsed).unwrap_or_else(|| body.to_string());
        return Err(JobError::from_http_failure(status, &message));
    }
    Ok(parsed)
}

pub(crate) fn payload_error_text(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get("error"),
        payload.get("message"),
        payload.get("detail"),
        payload.get("result").and_then(|result| result.get("error")),
    ];
    for candidate in candidates.into_iter().flatten() {
        let text = match candidate {
            Value::String(text) => text.trim().to_string(),
            Value::Object(obj) => obj
                .get("message")
                .or_else(|| obj.get("status"))
                .and_then(Value::as_str)
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
            _ => String::new(),
        };
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn transport_error(url: &str, err: reqwest::Error) -> JobError {
    let detail = format!("{url}: {err}");
    if err.is_timeout() {
        return JobError::categorized(ErrorCategory::Timeout, detail);
    }
    JobError::categorized(ErrorCategory::Network, detail)
}
