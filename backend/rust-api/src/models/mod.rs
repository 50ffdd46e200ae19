use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod question;
pub mod response;

pub use question::{BranchEndPolicy, Question, QuestionType};
pub use response::{AnswerRecord, ResponseStatus, SurveyResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: SurveyStatus,
    pub survey_type: SurveyType,
    /// Public link token; respondents address the take flow with this key.
    pub secret_key: String,
    /// Fixed per-survey completion proof, revealed only after a durable
    /// completed write.
    pub completion_secret_code: String,
    pub target_participants: u32,
    #[serde(default)]
    pub completed_responses: u32,
    #[serde(default)]
    pub in_progress_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Survey {
    pub fn quota_full(&self) -> bool {
        self.target_participants > 0 && self.completed_responses >= self.target_participants
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SurveyStatus {
    Draft,
    Open,
    Closed,
}

impl SurveyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStatus::Draft => "draft",
            SurveyStatus::Open => "open",
            SurveyStatus::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: SurveyStatus) -> bool {
        matches!(
            (self, next),
            (SurveyStatus::Draft, SurveyStatus::Open)
                | (SurveyStatus::Open, SurveyStatus::Closed)
                | (SurveyStatus::Closed, SurveyStatus::Open)
        )
    }
}

impl std::str::FromStr for SurveyStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "draft" => Ok(SurveyStatus::Draft),
            "open" => Ok(SurveyStatus::Open),
            "closed" => Ok(SurveyStatus::Closed),
            _ => Err(format!("Invalid survey status: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SurveyType {
    Free,
    Paid,
}

impl SurveyType {
    /// Free surveys show a privacy consent screen before the first question.
    pub fn requires_consent(&self) -> bool {
        matches!(self, SurveyType::Free)
    }
}
