use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{Action, CallbackOutcome, Execution, Task};

/// Performs a task's callback.
///
/// Implementations never fail: every problem, from an unparsable URL to a
/// timeout, becomes [`CallbackOutcome::Failed`].
#[async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Execution;
}

/// `reqwest`-backed executor with a client-wide request timeout.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn build_request(&self, action: &Action) -> std::result::Result<RequestBuilder, String> {
        let method = Method::from_bytes(action.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid method '{}'", action.method))?;
        let url = Url::parse(&action.url).map_err(|e| format!("invalid url '{}': {e}", action.url))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &action.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header '{name}'"))?;
            headers.append(name, value);
        }

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = action.body_bytes() {
            request = request.body(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl CallbackExecutor for HttpExecutor {
    async fn execute(&self, task: &Task) -> Execution {
        let run_at = Utc::now();
        let started = Instant::now();

        let outcome = match self.build_request(&task.action) {
            Err(error) => CallbackOutcome::Failed { error },
            Ok(request) => match request.send().await {
                Ok(response) => capture(response).await,
                Err(e) => transport_failure(e),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            CallbackOutcome::Response { status_code, .. } => {
                info!(task_id = %task.id, status = status_code, duration_ms, "callback answered");
            }
            CallbackOutcome::Failed { error } => {
                warn!(task_id = %task.id, duration_ms, "callback failed: {error}");
            }
        }

        Execution {
            run_at,
            duration_ms,
            outcome,
        }
    }
}

/// Read status, headers and body out of a response.
async fn capture(response: Response) -> CallbackOutcome {
    let status_code = response.status().as_u16();

    let mut headers = Map::new();
    for name in response.headers().keys() {
        let values: Vec<Value> = response
            .headers()
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        headers.insert(name.as_str().to_string(), Value::Array(values));
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return transport_failure(e),
    };
    let body = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    CallbackOutcome::Response {
        status_code,
        headers: Value::Object(headers),
        body,
    }
}

fn transport_failure(e: reqwest::Error) -> CallbackOutcome {
    let error = if e.is_timeout() {
        "timeout".to_string()
    } else {
        e.to_string()
    };
    CallbackOutcome::Failed { error }
}
