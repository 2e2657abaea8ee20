//! Local execution strategy: compile-then-run in a scratch directory.
//!
//! Scratch files live in a `tempfile::TempDir`, so the source file and
//! any compiled artifact are removed on every exit path, including
//! timeouts and early returns. Child processes are spawned with
//! `kill_on_drop`, so abandoning the wait future on timeout also
//! reaps the child - no orphans.

use super::{validate_request, ExecVerdict, ExecutionOutcome, ExecutionRequest, SandboxExecutor};
use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use gradepipe_common::types::Language;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct LocalRunner {
    compile_timeout: Duration,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self {
            compile_timeout: Duration::from_secs(10),
        }
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }
}

/// Source file name inside the scratch directory. Java requires the
/// file to match the public class, so submissions must declare `Main`.
fn source_file_name(language: Language) -> &'static str {
    match language {
        Language::C => "main.c",
        Language::Cpp => "main.cpp",
        Language::Python => "main.py",
        Language::Java => "Main.java",
        Language::Javascript => "main.js",
    }
}

fn compile_command(language: Language, dir: &Path) -> Option<(String, Vec<String>)> {
    let src = dir.join(source_file_name(language));
    let out = dir.join("main");
    match language {
        Language::C => Some((
            "gcc".to_string(),
            vec![
                src.display().to_string(),
                "-O2".to_string(),
                "-o".to_string(),
                out.display().to_string(),
            ],
        )),
        Language::Cpp => Some((
            "g++".to_string(),
            vec![
                src.display().to_string(),
                "-O2".to_string(),
                "-o".to_string(),
                out.display().to_string(),
            ],
        )),
        Language::Java => Some(("javac".to_string(), vec![src.display().to_string()])),
        Language::Python | Language::Javascript => None,
    }
}

fn run_command(language: Language, dir: &Path) -> (String, Vec<String>) {
    let src = dir.join(source_file_name(language));
    match language {
        Language::C | Language::Cpp => (dir.join("main").display().to_string(), vec![]),
        Language::Java => (
            "java".to_string(),
            vec![
                "-cp".to_string(),
                dir.display().to_string(),
                "Main".to_string(),
            ],
        ),
        Language::Python => ("python3".to_string(), vec![src.display().to_string()]),
        Language::Javascript => ("node".to_string(), vec![src.display().to_string()]),
    }
}

#[derive(Debug)]
enum ProcessResult {
    Completed {
        exit_ok: bool,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

/// Spawn a child, feed it stdin, and wait up to `limit`. The stdin
/// write runs concurrently with the wait so a full pipe buffer cannot
/// deadlock against an unread child.
async fn run_process(
    program: &str,
    args: &[String],
    stdin_data: &str,
    limit: Duration,
) -> Result<ProcessResult, EvalError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EvalError::SandboxUnavailable(format!("failed to spawn {}: {}", program, e)))?;

    let stdin_handle = child.stdin.take();
    let input = stdin_data.to_string();
    let feed_stdin = async move {
        if let Some(mut handle) = stdin_handle {
            // The child may exit without reading; a broken pipe here
            // is not an error.
            let _ = handle.write_all(input.as_bytes()).await;
            let _ = handle.shutdown().await;
        }
    };

    let wait = async {
        let (output, _) = tokio::join!(child.wait_with_output(), feed_stdin);
        output
    };

    match tokio::time::timeout(limit, wait).await {
        Ok(output) => {
            let output = output.map_err(|e| {
                EvalError::SandboxUnavailable(format!("failed to collect output: {}", e))
            })?;
            Ok(ProcessResult::Completed {
                exit_ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        // Dropping the cancelled wait future drops the child handle,
        // which kills the process via kill_on_drop.
        Err(_) => Ok(ProcessResult::TimedOut),
    }
}

#[async_trait]
impl SandboxExecutor for LocalRunner {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EvalError> {
        validate_request(request)?;

        let scratch = tempfile::tempdir().map_err(|e| {
            EvalError::SandboxUnavailable(format!("failed to create scratch dir: {}", e))
        })?;
        let dir = scratch.path();

        let source_path = dir.join(source_file_name(request.language));
        tokio::fs::write(&source_path, &request.code)
            .await
            .map_err(|e| {
                EvalError::SandboxUnavailable(format!("failed to write source file: {}", e))
            })?;

        // Phase 1: compile, on its own timeout budget.
        if let Some((program, args)) = compile_command(request.language, dir) {
            let started = Instant::now();
            match run_process(&program, &args, "", self.compile_timeout).await? {
                ProcessResult::Completed { exit_ok: true, .. } => {
                    debug!(
                        language = %request.language,
                        compile_ms = started.elapsed().as_millis() as u64,
                        "compilation succeeded"
                    );
                }
                ProcessResult::Completed { stderr, stdout, .. } => {
                    let message = if stderr.trim().is_empty() { stdout } else { stderr };
                    warn!(language = %request.language, "compilation failed");
                    return Ok(ExecutionOutcome::failed(
                        ExecVerdict::CompileError,
                        message.trim().to_string(),
                        started.elapsed().as_millis() as u64,
                    ));
                }
                ProcessResult::TimedOut => {
                    return Ok(ExecutionOutcome::failed(
                        ExecVerdict::CompileError,
                        format!(
                            "compilation timed out after {}ms",
                            self.compile_timeout.as_millis()
                        ),
                        self.compile_timeout.as_millis() as u64,
                    ));
                }
            }
        }

        // Phase 2: run against the test input.
        let (program, args) = run_command(request.language, dir);
        let started = Instant::now();
        match run_process(&program, &args, &request.stdin, request.time_limit).await? {
            ProcessResult::Completed {
                exit_ok: true,
                stdout,
                ..
            } => Ok(ExecutionOutcome::ok(
                stdout,
                started.elapsed().as_millis() as u64,
            )),
            ProcessResult::Completed { stderr, .. } => Ok(ExecutionOutcome::failed(
                ExecVerdict::RuntimeError,
                if stderr.trim().is_empty() {
                    "program exited with a non-zero status".to_string()
                } else {
                    stderr.trim().to_string()
                },
                started.elapsed().as_millis() as u64,
            )),
            ProcessResult::TimedOut => Ok(ExecutionOutcome::failed(
                ExecVerdict::TimeLimitExceeded,
                format!(
                    "execution timed out after {}ms",
                    request.time_limit.as_millis()
                ),
                request.time_limit.as_millis() as u64,
            )),
        }
        // `scratch` drops here, removing the source file and any
        // compiled artifact.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_languages_have_compile_step() {
        let dir = Path::new("/tmp/scratch");
        assert!(compile_command(Language::C, dir).is_some());
        assert!(compile_command(Language::Cpp, dir).is_some());
        assert!(compile_command(Language::Java, dir).is_some());
        assert!(compile_command(Language::Python, dir).is_none());
        assert!(compile_command(Language::Javascript, dir).is_none());
    }

    #[test]
    fn java_source_file_matches_class() {
        assert_eq!(source_file_name(Language::Java), "Main.java");
    }

    #[test]
    fn run_commands_reference_scratch_dir() {
        let dir = Path::new("/tmp/scratch");
        let (program, _) = run_command(Language::Cpp, dir);
        assert_eq!(program, "/tmp/scratch/main");
        let (program, args) = run_command(Language::Python, dir);
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["/tmp/scratch/main.py".to_string()]);
        let (program, args) = run_command(Language::Java, dir);
        assert_eq!(program, "java");
        assert_eq!(args[1], "/tmp/scratch");
    }

    #[tokio::test]
    async fn run_process_captures_output() {
        let result = run_process("echo", &["hello".to_string()], "", Duration::from_secs(5))
            .await
            .unwrap();
        match result {
            ProcessResult::Completed {
                exit_ok, stdout, ..
            } => {
                assert!(exit_ok);
                assert_eq!(stdout.trim(), "hello");
            }
            ProcessResult::TimedOut => panic!("echo should not time out"),
        }
    }

    #[tokio::test]
    async fn run_process_feeds_stdin() {
        let result = run_process("cat", &[], "from stdin\n", Duration::from_secs(5))
            .await
            .unwrap();
        match result {
            ProcessResult::Completed { stdout, .. } => {
                assert_eq!(stdout, "from stdin\n");
            }
            ProcessResult::TimedOut => panic!("cat should not time out"),
        }
    }

    #[tokio::test]
    async fn run_process_enforces_wall_timeout() {
        let started = Instant::now();
        let result = run_process(
            "sleep",
            &["5".to_string()],
            "",
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(matches!(result, ProcessResult::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_toolchain_is_sandbox_unavailable() {
        let err = run_process(
            "definitely-not-a-real-compiler",
            &[],
            "",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "SANDBOX_UNAVAILABLE");
    }
}
