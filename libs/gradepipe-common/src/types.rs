use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages accepted by the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    #[serde(alias = "c++")]
    Cpp,
    Python,
    Java,
    #[serde(alias = "js")]
    Javascript,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::Java => "java",
            Language::Javascript => "javascript",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "javascript" | "js" => Ok(Language::Javascript),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

impl Language {
    /// Languages with a separate compile phase in the local runner.
    pub fn is_compiled(&self) -> bool {
        matches!(self, Language::C | Language::Cpp | Language::Java)
    }
}

/// A single teacher-defined test case. Immutable, caller-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub const PRIORITY_NORMAL: i32 = 1;
pub const PRIORITY_HIGH: i32 = 10;

/// An ephemeral evaluation job. Mutated only by the scheduler
/// (retry_count, priority decay) until it reaches a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalJob {
    pub id: Uuid,
    pub exam_id: String,
    pub student_id: String,
    pub code: String,
    pub language: Language,
    pub test_cases: Vec<TestCase>,
    pub submitted_at: DateTime<Utc>,
    pub retry_count: u32,
    pub priority: i32,
}

impl EvalJob {
    pub fn new(
        exam_id: String,
        student_id: String,
        code: String,
        language: Language,
        test_cases: Vec<TestCase>,
        priority: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id,
            student_id,
            code,
            language,
            test_cases,
            submitted_at: Utc::now(),
            retry_count: 0,
            priority,
        }
    }
}

/// Verdict for a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompileError,
}

/// Outcome of one test case run, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub verdict: TestVerdict,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Full pass/fail detail for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub total_tests: u32,
    pub passed_tests: u32,
    pub results: Vec<TestOutcome>,
}

/// Terminal outcome of an ephemeral job. Written once by the
/// scheduler, read by pollers until the result TTL purges it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<EvaluationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    pub fn success(report: EvaluationReport) -> Self {
        Self {
            success: true,
            report: Some(report),
            error: None,
            error_code: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(error: impl Into<String>, error_code: &str) -> Self {
        Self {
            success: false,
            report: None,
            error: Some(error.into()),
            error_code: Some(error_code.to_string()),
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }
}

/// Progress of a bulk grading run. `total`/`completed` count whole
/// questions; submission-level granularity is exposed separately so
/// the two never disagree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u32,
    pub completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default)]
    pub submissions_total: u32,
    #[serde(default)]
    pub submissions_completed: u32,
}

/// Outcome for one student's submission to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub student_id: String,
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<EvaluationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Outcome for one programming question across all students.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub question_title: String,
    pub total_submissions: u32,
    pub results: Vec<SubmissionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted record of a whole-exam bulk grading run.
///
/// At most one task per (exam_id, teacher_id) may be pending or
/// processing at a time; the enqueue operation enforces this, not the
/// storage layer, because completed/failed history is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableTask {
    pub id: Uuid,
    pub exam_id: String,
    pub teacher_id: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub results: Vec<QuestionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DurableTask {
    pub fn new(exam_id: String, teacher_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            exam_id,
            teacher_id,
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            results: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trip() {
        for lang in [
            Language::C,
            Language::Cpp,
            Language::Python,
            Language::Java,
            Language::Javascript,
        ] {
            let parsed: Language = lang.to_string().parse().unwrap();
            assert_eq!(parsed, lang);
        }
    }

    #[test]
    fn language_aliases() {
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("js".parse::<Language>().unwrap(), Language::Javascript);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn language_serde_lowercase() {
        let json = serde_json::to_string(&Language::Cpp).unwrap();
        assert_eq!(json, "\"cpp\"");
        let lang: Language = serde_json::from_str("\"c++\"").unwrap();
        assert_eq!(lang, Language::Cpp);
    }

    #[test]
    fn new_job_starts_clean() {
        let job = EvalJob::new(
            "exam-1".into(),
            "student-1".into(),
            "print(1)".into(),
            Language::Python,
            vec![],
            PRIORITY_NORMAL,
        );
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.priority, PRIORITY_NORMAL);
    }

    #[test]
    fn task_active_states() {
        assert!(TaskStatus::Pending.is_active());
        assert!(TaskStatus::Processing.is_active());
        assert!(!TaskStatus::Completed.is_active());
        assert!(!TaskStatus::Failed.is_active());
    }

    #[test]
    fn durable_task_round_trip() {
        let task = DurableTask::new("exam-1".into(), "teacher-1".into());
        let json = serde_json::to_string(&task).unwrap();
        let back: DurableTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, TaskStatus::Pending);
    }
}
