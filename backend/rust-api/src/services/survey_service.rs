//! Authoring-side survey management: creation, question-set saves (with the
//! tree -> flat compile pass), lifecycle transitions.

use chrono::Utc;
use rand::distr::SampleString;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::branching::{flatten_question_tree, total_cost, validate_question_tree};
use crate::models::{Question, Survey, SurveyStatus, SurveyType};

use super::store::{StoreError, SurveyStore, SurveyUpdate};

const SECRET_KEY_LEN: usize = 24;
const COMPLETION_CODE_LEN: usize = 8;
/// No look-alike characters; respondents copy this by hand.
const COMPLETION_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error("Survey not found")]
    SurveyNotFound,
    #[error("Invalid survey payload: {0}")]
    InvalidPayload(String),
    #[error("Cannot transition survey from {from:?} to {to:?}")]
    InvalidStatusTransition { from: SurveyStatus, to: SurveyStatus },
    #[error("Question tree is not saveable: {}", issues.join("; "))]
    InvalidQuestionTree { issues: Vec<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSurveyRequest {
    pub owner_id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    pub survey_type: SurveyType,
    #[validate(range(min = 1, max = 100_000))]
    pub target_participants: u32,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: SurveyStatus,
}

#[derive(Debug, Serialize)]
pub struct SaveQuestionsResponse {
    pub question_count: usize,
    /// Rolled-up pricing weight of the authored tree.
    pub total_cost: i64,
}

pub struct SurveyService {
    store: Arc<dyn SurveyStore>,
}

impl SurveyService {
    pub fn new(store: Arc<dyn SurveyStore>) -> Self {
        Self { store }
    }

    pub async fn create_survey(&self, req: CreateSurveyRequest) -> Result<Survey, AuthoringError> {
        req.validate()
            .map_err(|e| AuthoringError::InvalidPayload(e.to_string()))?;

        let now = Utc::now();
        let survey = Survey {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id,
            title: req.title,
            description: req.description,
            status: SurveyStatus::Draft,
            survey_type: req.survey_type,
            secret_key: generate_secret_key(),
            completion_secret_code: generate_completion_code(),
            target_participants: req.target_participants,
            completed_responses: 0,
            in_progress_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_survey(&survey).await?;
        tracing::info!(survey_id = %survey.id, "Survey created");
        Ok(survey)
    }

    pub async fn survey(&self, id: &str) -> Result<Survey, AuthoringError> {
        self.store
            .survey_by_id(id)
            .await?
            .ok_or(AuthoringError::SurveyNotFound)
    }

    pub async fn questions(&self, survey_id: &str) -> Result<Vec<Question>, AuthoringError> {
        let _ = self.survey(survey_id).await?;
        Ok(self.store.questions_for_survey(survey_id).await?)
    }

    /// Save an authored question tree: validate the structure, compute the
    /// cost rollup, compile to the flat runtime shape, persist.
    pub async fn save_questions(
        &self,
        survey_id: &str,
        mut questions: Vec<Question>,
    ) -> Result<SaveQuestionsResponse, AuthoringError> {
        let _ = self.survey(survey_id).await?;

        for q in &mut questions {
            stamp_survey_id(q, survey_id);
        }

        let issues = validate_question_tree(&questions);
        if !issues.is_empty() {
            return Err(AuthoringError::InvalidQuestionTree { issues });
        }

        let authored_cost: i64 = questions.iter().map(total_cost).sum();
        let flat = flatten_question_tree(&questions);

        self.store.replace_questions(survey_id, &flat).await?;
        tracing::info!(
            survey_id = %survey_id,
            question_count = flat.len(),
            "Question set saved"
        );

        Ok(SaveQuestionsResponse {
            question_count: flat.len(),
            total_cost: authored_cost,
        })
    }

    pub async fn set_status(
        &self,
        survey_id: &str,
        next: SurveyStatus,
    ) -> Result<Survey, AuthoringError> {
        let survey = self.survey(survey_id).await?;
        if !survey.status.can_transition_to(next) {
            return Err(AuthoringError::InvalidStatusTransition {
                from: survey.status,
                to: next,
            });
        }

        self.store
            .update_survey(
                survey_id,
                SurveyUpdate {
                    status: Some(next),
                    ..Default::default()
                },
            )
            .await?;
        self.survey(survey_id).await
    }
}

fn stamp_survey_id(question: &mut Question, survey_id: &str) {
    question.survey_id = survey_id.to_string();
    for bucket in question.children.values_mut() {
        for child in bucket {
            stamp_survey_id(child, survey_id);
        }
    }
}

fn generate_secret_key() -> String {
    rand::distr::Alphanumeric.sample_string(&mut rand::rng(), SECRET_KEY_LEN)
}

fn generate_completion_code() -> String {
    let mut rng = rand::rng();
    (0..COMPLETION_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..COMPLETION_CODE_CHARSET.len());
            COMPLETION_CODE_CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchEndPolicy, QuestionType};
    use crate::services::store::MemoryStore;

    fn service() -> (SurveyService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SurveyService::new(store.clone()), store)
    }

    fn create_request() -> CreateSurveyRequest {
        CreateSurveyRequest {
            owner_id: "u1".to_string(),
            title: "Product feedback".to_string(),
            description: String::new(),
            survey_type: SurveyType::Free,
            target_participants: 50,
        }
    }

    #[tokio::test]
    async fn create_survey_generates_key_and_code() {
        let (service, _) = service();
        let a = service.create_survey(create_request()).await.unwrap();
        let b = service.create_survey(create_request()).await.unwrap();

        assert_eq!(a.status, SurveyStatus::Draft);
        assert_eq!(a.secret_key.len(), SECRET_KEY_LEN);
        assert_eq!(a.completion_secret_code.len(), COMPLETION_CODE_LEN);
        assert_ne!(a.secret_key, b.secret_key);
        assert!(a
            .completion_secret_code
            .bytes()
            .all(|c| COMPLETION_CODE_CHARSET.contains(&c)));
    }

    #[tokio::test]
    async fn create_survey_rejects_invalid_payload() {
        let (service, _) = service();
        let mut req = create_request();
        req.title = String::new();
        assert!(matches!(
            service.create_survey(req).await.unwrap_err(),
            AuthoringError::InvalidPayload(_)
        ));
    }

    #[tokio::test]
    async fn status_transitions_follow_lifecycle() {
        let (service, _) = service();
        let survey = service.create_survey(create_request()).await.unwrap();

        let opened = service
            .set_status(&survey.id, SurveyStatus::Open)
            .await
            .unwrap();
        assert_eq!(opened.status, SurveyStatus::Open);

        let err = service
            .set_status(&survey.id, SurveyStatus::Open)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthoringError::InvalidStatusTransition { .. }
        ));
    }

    #[tokio::test]
    async fn save_questions_flattens_and_prices_the_tree() {
        let (service, store) = service();
        let survey = service.create_survey(create_request()).await.unwrap();

        let mut root = Question::new("q0", "", QuestionType::BranchingChoice);
        root.order = 0;
        root.options = vec!["A".to_string(), "B".to_string()];
        root.cost = 15;
        let mut child = Question::new("c1", "", QuestionType::MultipleChoice);
        child.cost = 10;
        child.options = vec!["X".to_string(), "Y".to_string()];
        root.children.insert("A".to_string(), vec![child]);
        root.branch_end_types
            .insert("A".to_string(), BranchEndPolicy::Continue);

        let mut tail = Question::new("q1", "", QuestionType::ShortAnswer);
        tail.order = 1;
        tail.cost = 7;

        let saved = service
            .save_questions(&survey.id, vec![root, tail])
            .await
            .unwrap();
        assert_eq!(saved.question_count, 3);
        assert_eq!(saved.total_cost, 32);

        let stored = store.questions_for_survey(&survey.id).await.unwrap();
        let ids: Vec<&str> = stored.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "c1", "q1"]);
        assert_eq!(stored[0].branch_targets["A"], 2);
        assert!(stored.iter().all(|q| q.survey_id == survey.id));
        assert!(stored.iter().all(|q| q.children.is_empty()));
    }

    #[tokio::test]
    async fn save_questions_rejects_broken_tree() {
        let (service, _) = service();
        let survey = service.create_survey(create_request()).await.unwrap();

        let mut bad = Question::new("q0", "", QuestionType::MultipleChoice);
        bad.children.insert(
            "A".to_string(),
            vec![Question::new("c1", "", QuestionType::Ranking)],
        );

        let err = service
            .save_questions(&survey.id, vec![bad])
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::InvalidQuestionTree { .. }));
    }
}
