use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Vec<(&'static str, &'static str)> {
        let mut errors = Vec::new();
        if self.username.trim().chars().count() < 3 {
            errors.push(("username", "Username must be at least 3 characters long"));
        }
        if !looks_like_email(&self.email) {
            errors.push(("email", "Please enter a valid email address"));
        }
        if self.password.chars().count() < 6 {
            errors.push(("password", "Password must be at least 6 characters long"));
        }
        errors
    }
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub token: String,
    #[serde(default)]
    pub user: Option<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveMetadata {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolveResponse {
    #[serde(default)]
    pub success: bool,
    pub solution: Solution,
    #[serde(default)]
    pub metadata: SolveMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Intermediate => "Intermediate",
            Difficulty::Advanced => "Advanced",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(format!(
                "unknown difficulty {other:?} (expected beginner, intermediate or advanced)"
            )),
        }
    }
}

/// A worked example contributed for the next training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTrainingData {
    pub problem_text: String,
    pub solution_text: String,
    pub mathematical_concepts: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub step_by_step_explanation: String,
    pub difficulty_level: Difficulty,
    pub contributed_by: String,
}

impl NewTrainingData {
    /// Field-level problems, empty when the submission is acceptable.
    pub fn validate(&self) -> Vec<(&'static str, &'static str)> {
        let mut errors = Vec::new();
        if self.problem_text.trim().chars().count() < 10 {
            errors.push((
                "problem_text",
                "Problem text must be at least 10 characters long",
            ));
        }
        if self.solution_text.trim().chars().count() < 5 {
            errors.push((
                "solution_text",
                "Solution text must be at least 5 characters long",
            ));
        }
        if self.mathematical_concepts.iter().all(|c| c.trim().is_empty()) {
            errors.push((
                "mathematical_concepts",
                "Please select at least one mathematical concept",
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSubmission {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: i64,
    pub problem_text: String,
    #[serde(default)]
    pub solution_text: Option<String>,
    #[serde(default)]
    pub mathematical_concepts: Vec<String>,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub contributed_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub validation_status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrainResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub training_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub services: Map<String, Value>,
    #[serde(default)]
    pub model_info: Option<Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// A past solve, as returned by the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub problem_text: String,
    #[serde(default, alias = "solution_data")]
    pub solution: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
