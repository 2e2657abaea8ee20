// CLI commands driving the gradepipe server over HTTP

use anyhow::{bail, Context, Result};
use gradepipe_common::types::{Language, TestCase};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::time::Duration;

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        response.json().await.context("invalid JSON response")
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        let value: Value = response.json().await.context("invalid JSON response")?;
        if status.is_client_error() || status.is_server_error() {
            bail!(
                "server returned {}: {}",
                status,
                value["error"].as_str().unwrap_or("unknown error")
            );
        }
        Ok(value)
    }
}

#[derive(Deserialize)]
struct TestsFile {
    test_cases: Vec<TestCase>,
}

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    client: &ApiClient,
    file: &str,
    language: &str,
    tests: &str,
    exam: &str,
    student: &str,
    high_priority: bool,
    wait: bool,
) -> Result<()> {
    let language: Language = language
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let code = fs::read_to_string(file).with_context(|| format!("failed to read {}", file))?;
    let tests_raw =
        fs::read_to_string(tests).with_context(|| format!("failed to read {}", tests))?;
    let tests_file: TestsFile =
        serde_json::from_str(&tests_raw).context("test file must be {\"test_cases\": [...]}")?;
    if tests_file.test_cases.is_empty() {
        bail!("test file contains no test cases");
    }

    let body = serde_json::json!({
        "examId": exam,
        "studentId": student,
        "code": code,
        "language": language,
        "testCases": tests_file.test_cases.iter().map(|tc| serde_json::json!({
            "input": tc.input,
            "expectedOutput": tc.expected_output,
            "description": tc.description,
        })).collect::<Vec<_>>(),
        "highPriority": high_priority,
    });

    let response = client.post_json("/api/evaluate/submit", &body).await?;
    let job_id = response["jobId"]
        .as_str()
        .context("server response missing jobId")?
        .to_string();
    println!("✅ Job submitted: {}", job_id);

    if wait {
        poll_job(client, &job_id).await?;
    } else {
        println!("Poll it with: gradepipe-cli status {}", job_id);
    }
    Ok(())
}

async fn poll_job(client: &ApiClient, job_id: &str) -> Result<()> {
    loop {
        let doc = client
            .get_json(&format!("/api/evaluate/status/{}", job_id))
            .await?;
        match doc["status"].as_str().unwrap_or("") {
            "pending" => {
                println!(
                    "⏳ pending (position {}, ~{}s)",
                    doc["position"], doc["estimatedTime"]
                );
            }
            "processing" => println!("⚙️  processing..."),
            "completed" => {
                print_pretty(&doc)?;
                return Ok(());
            }
            other => bail!("unexpected status: {}", other),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

pub async fn job_status(client: &ApiClient, job_id: &str) -> Result<()> {
    let doc = client
        .get_json(&format!("/api/evaluate/status/{}", job_id))
        .await?;
    print_pretty(&doc)
}

pub async fn cancel(client: &ApiClient, job_id: &str) -> Result<()> {
    let doc = client
        .post_json(&format!("/api/evaluate/cancel/{}", job_id), &Value::Null)
        .await?;
    if doc["cancelled"].as_bool().unwrap_or(false) {
        println!("✅ Job {} cancelled", job_id);
    } else {
        println!("❌ Job {} could not be cancelled (already started or unknown)", job_id);
    }
    Ok(())
}

pub async fn stats(client: &ApiClient) -> Result<()> {
    let doc = client.get_json("/api/evaluate/stats").await?;
    print_pretty(&doc)
}

pub async fn grade(
    client: &ApiClient,
    exam: &str,
    teacher: &str,
    force: bool,
    wait: bool,
) -> Result<()> {
    let body = serde_json::json!({
        "examId": exam,
        "teacherId": teacher,
        "force": force,
    });
    let response = client.post_json("/api/tasks", &body).await?;
    let task_id = response["taskId"]
        .as_str()
        .context("server response missing taskId")?
        .to_string();
    println!("✅ Grading task: {}", task_id);

    if wait {
        poll_task(client, &task_id).await?;
    } else {
        println!("Poll it with: gradepipe-cli task {}", task_id);
    }
    Ok(())
}

async fn poll_task(client: &ApiClient, task_id: &str) -> Result<()> {
    loop {
        let doc = client.get_json(&format!("/api/tasks/{}", task_id)).await?;
        match doc["status"].as_str().unwrap_or("") {
            "pending" => println!("⏳ pending..."),
            "processing" => {
                let progress = &doc["progress"];
                println!(
                    "⚙️  {}% ({}/{} questions) {}",
                    progress["percentage"],
                    progress["completed"],
                    progress["total"],
                    progress["current"].as_str().unwrap_or("")
                );
            }
            "completed" | "failed" => {
                print_pretty(&doc)?;
                return Ok(());
            }
            other => bail!("unexpected status: {}", other),
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

pub async fn task_status(client: &ApiClient, task_id: &str) -> Result<()> {
    let doc = client.get_json(&format!("/api/tasks/{}", task_id)).await?;
    print_pretty(&doc)
}

pub async fn stop(client: &ApiClient, task_id: &str) -> Result<()> {
    let doc = client
        .post_json(&format!("/api/tasks/{}/stop", task_id), &Value::Null)
        .await?;
    if doc["stopped"].as_bool().unwrap_or(false) {
        println!("🛑 Task {} stopped", task_id);
    } else {
        println!("❌ Task {} was already finished", task_id);
    }
    Ok(())
}

fn print_pretty(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render response")?
    );
    Ok(())
}
