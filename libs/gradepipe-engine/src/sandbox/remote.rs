//! Remote judge strategy: delegates execution to an external isolated
//! judge service over HTTP. Transport-level failures (connect errors,
//! request timeouts, non-2xx responses) surface as
//! `SandboxUnavailable`; everything the judge itself reports comes
//! back as a classified outcome.

use super::{validate_request, ExecVerdict, ExecutionOutcome, ExecutionRequest, SandboxExecutor};
use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct JudgeRequest<'a> {
    source_code: &'a str,
    stdin: &'a str,
    language: String,
    /// Seconds, per the judge wire contract.
    cpu_time_limit: u64,
    /// Megabytes.
    memory_limit: u64,
}

#[derive(Debug, Deserialize)]
struct JudgeResponse {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "executionTime")]
    execution_time: Option<u64>,
}

pub struct RemoteJudge {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl RemoteJudge {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Probe the judge's health endpoint.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SandboxExecutor for RemoteJudge {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EvalError> {
        validate_request(request)?;

        let body = JudgeRequest {
            source_code: &request.code,
            stdin: &request.stdin,
            language: request.language.to_string(),
            cpu_time_limit: request.time_limit.as_secs().max(1),
            memory_limit: request.memory_limit_mb,
        };

        let url = format!("{}/api/execute", self.base_url);
        let started = Instant::now();

        let mut builder = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.request_timeout.max(request.time_limit));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "judge request failed");
            EvalError::SandboxUnavailable(format!("judge request failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(EvalError::SandboxUnavailable(format!(
                "judge returned HTTP {}",
                response.status()
            )));
        }

        let parsed: JudgeResponse = response.json().await.map_err(|e| {
            EvalError::SandboxUnavailable(format!("invalid judge response: {}", e))
        })?;

        let execution_time_ms = parsed
            .execution_time
            .unwrap_or_else(|| started.elapsed().as_millis() as u64);

        debug!(
            status = %parsed.status,
            execution_time_ms,
            "judge execution finished"
        );

        if parsed.status == "success" {
            Ok(ExecutionOutcome::ok(
                parsed.output.unwrap_or_default(),
                execution_time_ms,
            ))
        } else {
            // The wire contract only distinguishes success from error,
            // so remote failures carry the judge's message as a
            // runtime error; the evaluator still applies its own
            // wall-time check on executionTime.
            Ok(ExecutionOutcome::failed(
                ExecVerdict::RuntimeError,
                parsed
                    .error
                    .unwrap_or_else(|| "judge reported an error".to_string()),
                execution_time_ms,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradepipe_common::types::Language;

    #[test]
    fn request_wire_shape() {
        let body = JudgeRequest {
            source_code: "print(1)",
            stdin: "5",
            language: Language::Python.to_string(),
            cpu_time_limit: 10,
            memory_limit: 512,
        };
        let json: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(json["source_code"], "print(1)");
        assert_eq!(json["stdin"], "5");
        assert_eq!(json["language"], "python");
        assert_eq!(json["cpu_time_limit"], 10);
        assert_eq!(json["memory_limit"], 512);
    }

    #[test]
    fn response_parses_success() {
        let parsed: JudgeResponse = serde_json::from_str(
            r#"{"status":"success","output":"120\n","executionTime":42}"#,
        )
        .unwrap();
        assert_eq!(parsed.status, "success");
        assert_eq!(parsed.output.as_deref(), Some("120\n"));
        assert_eq!(parsed.execution_time, Some(42));
    }

    #[test]
    fn response_parses_error_without_timing() {
        let parsed: JudgeResponse =
            serde_json::from_str(r#"{"status":"error","error":"division by zero"}"#).unwrap();
        assert_eq!(parsed.status, "error");
        assert_eq!(parsed.error.as_deref(), Some("division by zero"));
        assert_eq!(parsed.execution_time, None);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let judge = RemoteJudge::new("http://localhost:3001/", None);
        assert_eq!(judge.base_url, "http://localhost:3001");
    }
}
