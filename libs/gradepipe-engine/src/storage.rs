//! Exam storage collaborator seam.
//!
//! The durable worker reads exams and submitted results through this
//! trait and writes aggregated scores back through it. The real
//! application owns the actual store; `MemoryExamStore` backs the
//! tests and the demo wiring.

use async_trait::async_trait;
use gradepipe_common::error::EvalError;
use gradepipe_common::types::{Language, TestCase};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionKind {
    Programming,
    Choice,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub title: String,
    pub kind: QuestionKind,
    pub points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub title: String,
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn programming_questions(&self) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| q.kind == QuestionKind::Programming)
            .collect()
    }
}

/// One student's submitted exam result. `answers` is the serialized
/// answer set keyed by question id, exactly as the exam app stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResultRecord {
    pub student_id: String,
    pub answers: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub is_graded: bool,
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn load_exam(&self, exam_id: &str) -> Result<Option<Exam>, EvalError>;

    /// All submitted results for an exam, one per student.
    async fn load_results(&self, exam_id: &str) -> Result<Vec<ExamResultRecord>, EvalError>;

    /// Add each student's aggregated programming score to their
    /// persisted exam score and mark the result graded.
    async fn apply_grades(
        &self,
        exam_id: &str,
        grades: &HashMap<String, u32>,
    ) -> Result<(), EvalError>;
}

#[derive(Default)]
pub struct MemoryExamStore {
    exams: Mutex<HashMap<String, Exam>>,
    results: Mutex<HashMap<String, Vec<ExamResultRecord>>>,
}

/// JSON fixture shape accepted by `MemoryExamStore::from_json_file`.
#[derive(Deserialize)]
struct Fixture {
    #[serde(default)]
    exams: Vec<Exam>,
    #[serde(default)]
    results: HashMap<String, Vec<ExamResultRecord>>,
}

impl MemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, EvalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .map_err(|e| EvalError::Storage(format!("bad exam fixture {}: {}", path.display(), e)))?;
        let store = Self::new();
        for exam in fixture.exams {
            store.insert_exam(exam);
        }
        for (exam_id, records) in fixture.results {
            for record in records {
                store.insert_result(&exam_id, record);
            }
        }
        Ok(store)
    }

    pub fn insert_exam(&self, exam: Exam) {
        self.exams.lock().unwrap().insert(exam.id.clone(), exam);
    }

    pub fn insert_result(&self, exam_id: &str, record: ExamResultRecord) {
        self.results
            .lock()
            .unwrap()
            .entry(exam_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn result_for(&self, exam_id: &str, student_id: &str) -> Option<ExamResultRecord> {
        self.results
            .lock()
            .unwrap()
            .get(exam_id)?
            .iter()
            .find(|r| r.student_id == student_id)
            .cloned()
    }
}

#[async_trait]
impl ExamStore for MemoryExamStore {
    async fn load_exam(&self, exam_id: &str) -> Result<Option<Exam>, EvalError> {
        Ok(self.exams.lock().unwrap().get(exam_id).cloned())
    }

    async fn load_results(&self, exam_id: &str) -> Result<Vec<ExamResultRecord>, EvalError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(exam_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_grades(
        &self,
        exam_id: &str,
        grades: &HashMap<String, u32>,
    ) -> Result<(), EvalError> {
        let mut results = self.results.lock().unwrap();
        let Some(records) = results.get_mut(exam_id) else {
            return Ok(());
        };
        for record in records.iter_mut() {
            if let Some(points) = grades.get(&record.student_id) {
                record.score += points;
                record.is_graded = true;
            }
        }
        Ok(())
    }
}
