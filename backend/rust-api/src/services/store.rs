//! Persistence collaborator for surveys, questions and responses.
//!
//! The traversal core only ever talks to [`SurveyStore`]; production wires
//! [`MongoStore`], while preview/demo flows and tests run on
//! [`MemoryStore`]. `update_response` distinguishes `NotFound` so the
//! finalization path can fall back from update-by-id to create-new-row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::Database;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::track_db_operation;
use crate::models::question::sort_by_order;
use crate::models::{
    AnswerRecord, Question, ResponseStatus, Survey, SurveyResponse, SurveyStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields for a first response write (id is assigned by the store).
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub survey_id: String,
    pub session_id: String,
    pub ip_address: String,
    pub status: ResponseStatus,
    pub answers: Vec<AnswerRecord>,
    pub secret_code: Option<String>,
    pub last_activity: DateTime<Utc>,
}

/// Partial response update; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ResponseUpdate {
    pub status: Option<ResponseStatus>,
    pub answers: Option<Vec<AnswerRecord>>,
    pub secret_code: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Partial survey update; counter deltas are applied atomically.
#[derive(Debug, Clone, Default)]
pub struct SurveyUpdate {
    pub status: Option<SurveyStatus>,
    pub completed_responses_delta: i64,
    pub in_progress_delta: i64,
}

#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn insert_survey(&self, survey: &Survey) -> StoreResult<()>;
    async fn survey_by_id(&self, id: &str) -> StoreResult<Option<Survey>>;
    async fn survey_by_key(&self, secret_key: &str) -> StoreResult<Option<Survey>>;
    async fn update_survey(&self, id: &str, update: SurveyUpdate) -> StoreResult<()>;

    /// Replace the full question set of a survey (authoring save).
    async fn replace_questions(&self, survey_id: &str, questions: &[Question]) -> StoreResult<()>;
    /// All questions of a survey, sorted by `order`.
    async fn questions_for_survey(&self, survey_id: &str) -> StoreResult<Vec<Question>>;

    async fn create_response(&self, new: NewResponse) -> StoreResult<SurveyResponse>;
    async fn update_response(&self, id: &str, update: ResponseUpdate) -> StoreResult<()>;
    async fn response_by_session(
        &self,
        survey_id: &str,
        session_id: &str,
    ) -> StoreResult<Option<SurveyResponse>>;
    async fn completed_response_for_ip(
        &self,
        survey_id: &str,
        ip: &str,
    ) -> StoreResult<Option<SurveyResponse>>;
    async fn responses_for_survey(&self, survey_id: &str) -> StoreResult<Vec<SurveyResponse>>;
}

// -- MongoDB ----------------------------------------------------------------

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn surveys(&self) -> mongodb::Collection<Survey> {
        self.db.collection("surveys")
    }

    fn questions(&self) -> mongodb::Collection<Question> {
        self.db.collection("questions")
    }

    fn responses(&self) -> mongodb::Collection<SurveyResponse> {
        self.db.collection("responses")
    }
}

#[async_trait]
impl SurveyStore for MongoStore {
    async fn ping(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn insert_survey(&self, survey: &Survey) -> StoreResult<()> {
        self.surveys()
            .insert_one(survey)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn survey_by_id(&self, id: &str) -> StoreResult<Option<Survey>> {
        let survey = self
            .surveys()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(survey)
    }

    async fn survey_by_key(&self, secret_key: &str) -> StoreResult<Option<Survey>> {
        let survey = self
            .surveys()
            .find_one(doc! { "secret_key": secret_key })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(survey)
    }

    async fn update_survey(&self, id: &str, update: SurveyUpdate) -> StoreResult<()> {
        let mut set = doc! { "updated_at": mongodb::bson::to_bson(&Utc::now()).unwrap_or_default() };
        if let Some(status) = update.status {
            set.insert("status", status.as_str());
        }
        let mut change = doc! { "$set": set };
        let mut inc = doc! {};
        if update.completed_responses_delta != 0 {
            inc.insert("completed_responses", update.completed_responses_delta);
        }
        if update.in_progress_delta != 0 {
            inc.insert("in_progress_count", update.in_progress_delta);
        }
        if !inc.is_empty() {
            change.insert("$inc", inc);
        }

        let result = self
            .surveys()
            .update_one(doc! { "_id": id }, change)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn replace_questions(&self, survey_id: &str, questions: &[Question]) -> StoreResult<()> {
        track_db_operation("replace", "questions", async {
            self.questions()
                .delete_many(doc! { "survey_id": survey_id })
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            if !questions.is_empty() {
                self.questions()
                    .insert_many(questions)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
            }
            Ok(())
        })
        .await
        .map_err(StoreError::Backend)
    }

    async fn questions_for_survey(&self, survey_id: &str) -> StoreResult<Vec<Question>> {
        use futures::TryStreamExt;

        let cursor = self
            .questions()
            .find(doc! { "survey_id": survey_id })
            .sort(doc! { "order": 1 })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let questions: Vec<Question> = cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(questions)
    }

    async fn create_response(&self, new: NewResponse) -> StoreResult<SurveyResponse> {
        let response = SurveyResponse {
            id: Uuid::new_v4().to_string(),
            survey_id: new.survey_id,
            session_id: new.session_id,
            status: new.status,
            answers: new.answers,
            ip_address: new.ip_address,
            secret_code: new.secret_code,
            last_activity: new.last_activity,
        };

        track_db_operation("insert", "responses", async {
            self.responses()
                .insert_one(&response)
                .await
                .map(|_| ())
                .map_err(|e| anyhow::anyhow!(e))
        })
        .await
        .map_err(StoreError::Backend)?;

        Ok(response)
    }

    async fn update_response(&self, id: &str, update: ResponseUpdate) -> StoreResult<()> {
        let mut set = doc! {};
        if let Some(status) = update.status {
            set.insert("status", status.as_str());
        }
        if let Some(answers) = &update.answers {
            set.insert(
                "answers",
                mongodb::bson::to_bson(answers)
                    .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?,
            );
        }
        if let Some(code) = &update.secret_code {
            set.insert("secret_code", code.as_str());
        }
        if let Some(at) = update.last_activity {
            set.insert(
                "last_activity",
                mongodb::bson::to_bson(&at)
                    .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?,
            );
        }

        let result = track_db_operation("update", "responses", async {
            self.responses()
                .update_one(doc! { "_id": id }, doc! { "$set": set })
                .await
                .map_err(|e| anyhow::anyhow!(e))
        })
        .await
        .map_err(StoreError::Backend)?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn response_by_session(
        &self,
        survey_id: &str,
        session_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        let response = self
            .responses()
            .find_one(doc! { "survey_id": survey_id, "session_id": session_id })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(response)
    }

    async fn completed_response_for_ip(
        &self,
        survey_id: &str,
        ip: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        let response = self
            .responses()
            .find_one(doc! {
                "survey_id": survey_id,
                "ip_address": ip,
                "status": ResponseStatus::Completed.as_str(),
            })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(response)
    }

    async fn responses_for_survey(&self, survey_id: &str) -> StoreResult<Vec<SurveyResponse>> {
        use futures::TryStreamExt;

        let cursor = self
            .responses()
            .find(doc! { "survey_id": survey_id })
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let responses: Vec<SurveyResponse> = cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(responses)
    }
}

// -- in-memory --------------------------------------------------------------

/// Backing store for preview/demo flows and tests. Failure injection toggles
/// let the persistence-failure contracts (checkpoint tolerance, finalize
/// fallback) be exercised deterministically.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
    response_update_calls: AtomicUsize,
}

#[derive(Default)]
struct MemoryInner {
    surveys: HashMap<String, Survey>,
    questions: HashMap<String, Vec<Question>>,
    responses: HashMap<String, SurveyResponse>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn response_update_calls(&self) -> usize {
        self.response_update_calls.load(Ordering::SeqCst)
    }

    pub fn response_count(&self, survey_id: &str) -> usize {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .responses
            .values()
            .filter(|r| r.survey_id == survey_id)
            .count()
    }

    pub fn response(&self, id: &str) -> Option<SurveyResponse> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .responses
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl SurveyStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_survey(&self, survey: &Survey) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.surveys.insert(survey.id.clone(), survey.clone());
        Ok(())
    }

    async fn survey_by_id(&self, id: &str) -> StoreResult<Option<Survey>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.surveys.get(id).cloned())
    }

    async fn survey_by_key(&self, secret_key: &str) -> StoreResult<Option<Survey>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .surveys
            .values()
            .find(|s| s.secret_key == secret_key)
            .cloned())
    }

    async fn update_survey(&self, id: &str, update: SurveyUpdate) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let survey = inner.surveys.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(status) = update.status {
            survey.status = status;
        }
        survey.completed_responses =
            (survey.completed_responses as i64 + update.completed_responses_delta).max(0) as u32;
        survey.in_progress_count =
            (survey.in_progress_count as i64 + update.in_progress_delta).max(0) as u32;
        survey.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_questions(&self, survey_id: &str, questions: &[Question]) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .questions
            .insert(survey_id.to_string(), questions.to_vec());
        Ok(())
    }

    async fn questions_for_survey(&self, survey_id: &str) -> StoreResult<Vec<Question>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut questions = inner.questions.get(survey_id).cloned().unwrap_or_default();
        sort_by_order(&mut questions);
        Ok(questions)
    }

    async fn create_response(&self, new: NewResponse) -> StoreResult<SurveyResponse> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "injected create failure"
            )));
        }
        let response = SurveyResponse {
            id: Uuid::new_v4().to_string(),
            survey_id: new.survey_id,
            session_id: new.session_id,
            status: new.status,
            answers: new.answers,
            ip_address: new.ip_address,
            secret_code: new.secret_code,
            last_activity: new.last_activity,
        };
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .responses
            .insert(response.id.clone(), response.clone());
        Ok(response)
    }

    async fn update_response(&self, id: &str, update: ResponseUpdate) -> StoreResult<()> {
        self.response_update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "injected update failure"
            )));
        }
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let response = inner.responses.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(status) = update.status {
            response.status = status;
        }
        if let Some(answers) = update.answers {
            response.answers = answers;
        }
        if let Some(code) = update.secret_code {
            response.secret_code = Some(code);
        }
        if let Some(at) = update.last_activity {
            response.last_activity = at;
        }
        Ok(())
    }

    async fn response_by_session(
        &self,
        survey_id: &str,
        session_id: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .responses
            .values()
            .find(|r| r.survey_id == survey_id && r.session_id == session_id)
            .cloned())
    }

    async fn completed_response_for_ip(
        &self,
        survey_id: &str,
        ip: &str,
    ) -> StoreResult<Option<SurveyResponse>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .responses
            .values()
            .find(|r| {
                r.survey_id == survey_id
                    && r.ip_address == ip
                    && r.status == ResponseStatus::Completed
            })
            .cloned())
    }

    async fn responses_for_survey(&self, survey_id: &str) -> StoreResult<Vec<SurveyResponse>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .responses
            .values()
            .filter(|r| r.survey_id == survey_id)
            .cloned()
            .collect())
    }
}
