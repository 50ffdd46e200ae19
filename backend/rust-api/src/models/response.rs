use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::question::Question;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::InProgress => "in_progress",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Abandoned => "abandoned",
        }
    }
}

/// One answered question. `answer` is always a string: ranking answers are
/// JSON-encoded rank maps, multi-select answers are comma-joined labels,
/// image-choice answers are stringified option indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_id: String,
    pub answer: String,
}

/// One respondent's progress/record. References Survey and Questions by id
/// only. Once `completed` the row is immutable from the engine's view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub survey_id: String,
    pub session_id: String,
    pub status: ResponseStatus,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_code: Option<String>,
    pub last_activity: DateTime<Utc>,
}

// -- take flow DTOs ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartTakeRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTakeAnswerRequest {
    pub session_id: String,
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct StepBackRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AbandonRequest {
    pub session_id: String,
}

/// What the respondent UI renders next.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TakeStepKind {
    PrivacyConsent,
    Question,
    ReadyToSubmit,
    AlreadyCompleted,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TakeStepResponse {
    pub step: TakeStepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionIndicator>,
    /// Recorded answer for the question in view, so back-navigation can
    /// re-hydrate type-correct staging state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_answer: Option<String>,
    /// Present only on the already-completed short circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub secret_code: String,
}

/// `current / total` display, 1-based.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionIndicator {
    pub current: u32,
    pub total: u32,
}

/// Respondent-facing projection of a question (no authoring internals).
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: String,
    pub question_type: super::QuestionType,
    pub text: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_descriptions: Vec<String>,
}

impl QuestionView {
    pub fn from_question(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_type: q.question_type,
            text: q.text.clone(),
            options: q.options.clone(),
            max_selections: q.max_selections,
            image_urls: q.image_urls.clone(),
            image_descriptions: q.image_descriptions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ResponseStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn secret_code_omitted_until_set() {
        let response = SurveyResponse {
            id: "r1".to_string(),
            survey_id: "s1".to_string(),
            session_id: "sess".to_string(),
            status: ResponseStatus::InProgress,
            answers: vec![],
            ip_address: "10.0.0.1".to_string(),
            secret_code: None,
            last_activity: Utc::now(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("secret_code").is_none());
    }
}
