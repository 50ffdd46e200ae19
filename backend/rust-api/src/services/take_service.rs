//! Respondent-facing survey session orchestration.
//!
//! Wraps the pure traversal engine with session-state persistence, per
//! session re-entrancy locks, best-effort checkpointing and the two-phase
//! durable finalization that gates revealing the completion secret code.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::engine::{transition, EngineError, EngineStatus, TraversalState};
use crate::metrics::{RESPONSES_TOTAL, TAKE_SESSIONS_ACTIVE};
use crate::models::response::{
    FinalizeResponse, PositionIndicator, QuestionView, TakeStepKind, TakeStepResponse,
};
use crate::models::{Question, ResponseStatus, Survey, SurveyStatus};

use super::checkpoint::{CheckpointJob, CheckpointWriter};
use super::session_cache::SessionCache;
use super::store::{NewResponse, ResponseUpdate, StoreError, SurveyStore, SurveyUpdate};

const DEFAULT_SESSION_TTL_SECONDS: u64 = 3600;
/// The completed marker doubles as the duplicate-submission guard, so it
/// outlives the answering session.
const COMPLETED_MARKER_TTL_SECONDS: u64 = 30 * 86400;
const TRANSITION_LOCK_TTL_SECONDS: u64 = 10;
const FINALIZE_LOCK_TTL_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum TakeError {
    #[error("Survey not found")]
    SurveyNotFound,
    #[error("Survey is not accepting responses")]
    SurveyClosed,
    #[error("Survey has reached its participant quota")]
    QuotaFull,
    #[error("No active session; start the survey first")]
    SessionNotFound,
    #[error("Another transition is in flight for this session")]
    TransitionInProgress,
    #[error("Session is not ready to submit")]
    NotReadyToSubmit,
    #[error("Could not save the completed response; please retry")]
    SaveFailed,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] anyhow::Error),
}

/// Everything a respondent session needs between HTTP calls, parked in the
/// session cache as JSON.
#[derive(Debug, Serialize, Deserialize)]
struct TakeSession {
    survey_id: String,
    session_id: String,
    ip_address: String,
    response_id: Option<String>,
    /// Set only after durable completion; source of the idempotent re-entry
    /// short circuit.
    completed_code: Option<String>,
    traversal: TraversalState,
}

pub struct TakeSurveyService {
    store: Arc<dyn SurveyStore>,
    cache: Arc<dyn SessionCache>,
    checkpoints: CheckpointWriter,
}

impl TakeSurveyService {
    pub fn new(
        store: Arc<dyn SurveyStore>,
        cache: Arc<dyn SessionCache>,
        checkpoints: CheckpointWriter,
    ) -> Self {
        Self {
            store,
            cache,
            checkpoints,
        }
    }

    /// Begin (or resume) a respondent session addressed by the survey's
    /// public key. Re-entry after completion short-circuits to the stored
    /// secret code without touching the response store.
    pub async fn start(
        &self,
        secret_key: &str,
        session_id: &str,
        ip_address: &str,
    ) -> Result<TakeStepResponse, TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let existing = self.load_session(&survey.id, session_id).await?;

        // local completed marker for this session
        if let Some(code) = existing.as_ref().and_then(|s| s.completed_code.as_ref()) {
            return Ok(already_completed(code.clone()));
        }
        // coarse, best-effort IP dedup; the code comes from the survey's
        // fixed code field, not from the stored row
        if self
            .store
            .completed_response_for_ip(&survey.id, ip_address)
            .await?
            .is_some()
        {
            return Ok(already_completed(survey.completion_secret_code.clone()));
        }

        if survey.status != SurveyStatus::Open {
            return Err(TakeError::SurveyClosed);
        }
        if survey.quota_full() {
            return Err(TakeError::QuotaFull);
        }

        // resume an interrupted session where it left off
        if let Some(session) = existing {
            let questions = self.store.questions_for_survey(&survey.id).await?;
            return self.step_view(&session, &questions);
        }

        let mut session = TakeSession {
            survey_id: survey.id.clone(),
            session_id: session_id.to_string(),
            ip_address: ip_address.to_string(),
            response_id: None,
            completed_code: None,
            traversal: TraversalState::new(),
        };

        if survey.survey_type.requires_consent() {
            session.traversal.status = EngineStatus::PrivacyConsent;
            self.save_session(&session, session_ttl_seconds()).await?;
            return Ok(TakeStepResponse {
                step: TakeStepKind::PrivacyConsent,
                question: None,
                position: None,
                recorded_answer: None,
                secret_code: None,
            });
        }

        self.open_response(&mut session).await;
        let questions = self.store.questions_for_survey(&survey.id).await?;
        transition::enter_answering(&mut session.traversal, &questions);
        self.save_session(&session, session_ttl_seconds()).await?;
        self.step_view(&session, &questions)
    }

    /// Free-survey consent confirmation: creates the in-progress response
    /// row and presents the first question.
    pub async fn confirm_consent(
        &self,
        secret_key: &str,
        session_id: &str,
    ) -> Result<TakeStepResponse, TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let mut session = self
            .load_session(&survey.id, session_id)
            .await?
            .ok_or(TakeError::SessionNotFound)?;

        let questions = self.store.questions_for_survey(&survey.id).await?;

        // a repeated consent click is harmless
        if session.traversal.status != EngineStatus::PrivacyConsent {
            return self.step_view(&session, &questions);
        }

        self.open_response(&mut session).await;
        transition::enter_answering(&mut session.traversal, &questions);
        self.save_session(&session, session_ttl_seconds()).await?;
        self.step_view(&session, &questions)
    }

    /// The core per-question transition. The checkpoint write is enqueued,
    /// never awaited: its failure must not block advancement.
    pub async fn submit_answer(
        &self,
        secret_key: &str,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<TakeStepResponse, TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let lock_key = transition_lock_key(&survey.id, session_id);
        if !self.cache.try_lock(&lock_key, TRANSITION_LOCK_TTL_SECONDS).await? {
            return Err(TakeError::TransitionInProgress);
        }

        let result = self
            .submit_answer_locked(&survey, session_id, question_id, answer)
            .await;

        if let Err(e) = self.cache.unlock(&lock_key).await {
            tracing::warn!("Failed to release transition lock: {e:#}");
        }
        result
    }

    async fn submit_answer_locked(
        &self,
        survey: &Survey,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<TakeStepResponse, TakeError> {
        let mut session = self
            .load_session(&survey.id, session_id)
            .await?
            .ok_or(TakeError::SessionNotFound)?;

        let questions = self.store.questions_for_survey(&survey.id).await?;
        transition::submit_answer(&mut session.traversal, &questions, question_id, answer)?;

        if let Some(response_id) = &session.response_id {
            self.checkpoints.enqueue(CheckpointJob {
                response_id: response_id.clone(),
                answers: session.traversal.answers.clone(),
                last_activity: Utc::now(),
            });
        }

        self.save_session(&session, session_ttl_seconds()).await?;
        self.step_view(&session, &questions)
    }

    /// Step back one question, returning the question now in view together
    /// with its recorded answer for staging re-hydration.
    pub async fn step_back(
        &self,
        secret_key: &str,
        session_id: &str,
    ) -> Result<TakeStepResponse, TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let mut session = self
            .load_session(&survey.id, session_id)
            .await?
            .ok_or(TakeError::SessionNotFound)?;

        let questions = self.store.questions_for_survey(&survey.id).await?;
        transition::step_back(&mut session.traversal, &questions)?;
        self.save_session(&session, session_ttl_seconds()).await?;
        self.step_view(&session, &questions)
    }

    /// The single durable write of the flow. Two-phase: update by known id,
    /// else create a new row and adopt its id. The secret code is revealed
    /// only after one of the phases succeeds; a double submit returns the
    /// same code without a second row.
    pub async fn finalize(
        &self,
        secret_key: &str,
        session_id: &str,
    ) -> Result<FinalizeResponse, TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let mut session = self
            .load_session(&survey.id, session_id)
            .await?
            .ok_or(TakeError::SessionNotFound)?;

        // idempotent: completion already durable, hand the code back
        if let Some(code) = &session.completed_code {
            return Ok(FinalizeResponse {
                secret_code: code.clone(),
            });
        }
        if session.traversal.status != EngineStatus::ReadyToSubmit {
            return Err(TakeError::NotReadyToSubmit);
        }

        let lock_key = finalize_lock_key(&survey.id, session_id);
        if !self.cache.try_lock(&lock_key, FINALIZE_LOCK_TTL_SECONDS).await? {
            return Err(TakeError::TransitionInProgress);
        }

        let result = self.finalize_locked(&survey, &mut session).await;

        if let Err(e) = self.cache.unlock(&lock_key).await {
            tracing::warn!("Failed to release finalize lock: {e:#}");
        }
        result
    }

    async fn finalize_locked(
        &self,
        survey: &Survey,
        session: &mut TakeSession,
    ) -> Result<FinalizeResponse, TakeError> {
        let code = survey.completion_secret_code.clone();
        let now = Utc::now();

        let update = ResponseUpdate {
            status: Some(ResponseStatus::Completed),
            answers: Some(session.traversal.answers.clone()),
            secret_code: Some(code.clone()),
            last_activity: Some(now),
        };

        let mut durable_id: Option<String> = None;
        if let Some(response_id) = &session.response_id {
            match self.store.update_response(response_id, update.clone()).await {
                Ok(()) => durable_id = Some(response_id.clone()),
                Err(e) => {
                    tracing::warn!(
                        response_id = %response_id,
                        "Finalize update failed, falling back to create: {e:#}"
                    );
                }
            }
        }

        if durable_id.is_none() {
            match self
                .store
                .create_response(NewResponse {
                    survey_id: survey.id.clone(),
                    session_id: session.session_id.clone(),
                    ip_address: session.ip_address.clone(),
                    status: ResponseStatus::Completed,
                    answers: session.traversal.answers.clone(),
                    secret_code: Some(code.clone()),
                    last_activity: now,
                })
                .await
            {
                Ok(created) => durable_id = Some(created.id),
                Err(e) => {
                    tracing::error!("Finalize create fallback failed: {e:#}");
                }
            }
        }

        let Some(durable_id) = durable_id else {
            // no durable write, no code: the complete button stays actionable
            RESPONSES_TOTAL.with_label_values(&["finalize_failed"]).inc();
            return Err(TakeError::SaveFailed);
        };

        session.response_id = Some(durable_id);
        session.completed_code = Some(code.clone());
        session.traversal.status = EngineStatus::Completed;
        self.save_session(session, COMPLETED_MARKER_TTL_SECONDS).await?;

        // opportunistic counters; failures are non-critical
        if let Err(e) = self
            .store
            .update_survey(
                &survey.id,
                SurveyUpdate {
                    completed_responses_delta: 1,
                    in_progress_delta: -1,
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(survey_id = %survey.id, "Survey counter update failed: {e:#}");
        }

        RESPONSES_TOTAL.with_label_values(&["completed"]).inc();
        TAKE_SESSIONS_ACTIVE.dec();
        tracing::info!(
            survey_id = %survey.id,
            session_id = %session.session_id,
            "Response finalized"
        );

        Ok(FinalizeResponse { secret_code: code })
    }

    /// Session teardown before completion. Fire-and-forget: the respondent
    /// has already left, so every failure here is swallowed.
    pub async fn abandon(&self, secret_key: &str, session_id: &str) -> Result<(), TakeError> {
        let survey = self.load_survey(secret_key).await?;
        let Some(session) = self.load_session(&survey.id, session_id).await? else {
            return Ok(());
        };
        if session.completed_code.is_some() {
            return Ok(());
        }

        let _ = self
            .cache
            .delete(&session_key(&survey.id, session_id))
            .await;

        let store = self.store.clone();
        let survey_id = survey.id.clone();
        let response_id = session.response_id.clone();
        tokio::spawn(async move {
            if let Some(response_id) = response_id {
                let result = store
                    .update_response(
                        &response_id,
                        ResponseUpdate {
                            status: Some(ResponseStatus::Abandoned),
                            last_activity: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(e) = result {
                    tracing::debug!("Abandonment cleanup failed (ignored): {e:#}");
                }
                let _ = store
                    .update_survey(
                        &survey_id,
                        SurveyUpdate {
                            in_progress_delta: -1,
                            ..Default::default()
                        },
                    )
                    .await;
            }
        });

        RESPONSES_TOTAL.with_label_values(&["abandoned"]).inc();
        TAKE_SESSIONS_ACTIVE.dec();
        Ok(())
    }

    // -- internals ----------------------------------------------------------

    async fn load_survey(&self, secret_key: &str) -> Result<Survey, TakeError> {
        self.store
            .survey_by_key(secret_key)
            .await?
            .ok_or(TakeError::SurveyNotFound)
    }

    async fn load_session(
        &self,
        survey_id: &str,
        session_id: &str,
    ) -> Result<Option<TakeSession>, TakeError> {
        let Some(json) = self.cache.get(&session_key(survey_id, session_id)).await? else {
            return Ok(None);
        };
        let session = serde_json::from_str(&json)
            .map_err(|e| TakeError::Cache(anyhow::anyhow!("corrupt session state: {e}")))?;
        Ok(Some(session))
    }

    async fn save_session(&self, session: &TakeSession, ttl: u64) -> Result<(), TakeError> {
        let json = serde_json::to_string(session)
            .map_err(|e| TakeError::Cache(anyhow::anyhow!("session serialize failed: {e}")))?;
        self.cache
            .put(&session_key(&session.survey_id, &session.session_id), &json, ttl)
            .await?;
        Ok(())
    }

    /// Create the in-progress response row. Creation failure is survivable:
    /// the session continues without an id and finalization falls back to
    /// create-new-row.
    async fn open_response(&self, session: &mut TakeSession) {
        match self
            .store
            .create_response(NewResponse {
                survey_id: session.survey_id.clone(),
                session_id: session.session_id.clone(),
                ip_address: session.ip_address.clone(),
                status: ResponseStatus::InProgress,
                answers: vec![],
                secret_code: None,
                last_activity: Utc::now(),
            })
            .await
        {
            Ok(created) => {
                session.response_id = Some(created.id);
                RESPONSES_TOTAL.with_label_values(&["started"]).inc();
                TAKE_SESSIONS_ACTIVE.inc();
                if let Err(e) = self
                    .store
                    .update_survey(
                        &session.survey_id,
                        SurveyUpdate {
                            in_progress_delta: 1,
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::warn!("in_progress counter update failed: {e:#}");
                }
            }
            Err(e) => {
                tracing::warn!(
                    survey_id = %session.survey_id,
                    "Initial response create failed, continuing without id: {e:#}"
                );
            }
        }
    }

    fn step_view(
        &self,
        session: &TakeSession,
        questions: &[Question],
    ) -> Result<TakeStepResponse, TakeError> {
        match session.traversal.status {
            EngineStatus::PrivacyConsent => Ok(TakeStepResponse {
                step: TakeStepKind::PrivacyConsent,
                question: None,
                position: None,
                recorded_answer: None,
                secret_code: None,
            }),
            EngineStatus::ReadyToSubmit => Ok(TakeStepResponse {
                step: TakeStepKind::ReadyToSubmit,
                question: None,
                position: None,
                recorded_answer: None,
                secret_code: None,
            }),
            EngineStatus::Completed => Ok(already_completed(
                session.completed_code.clone().unwrap_or_default(),
            )),
            _ => {
                let current = transition::current_question(&session.traversal, questions);
                let total = transition::active_list_len(&session.traversal, questions) as u32;
                let view = current.as_ref().map(QuestionView::from_question);
                let recorded = current
                    .as_ref()
                    .and_then(|q| session.traversal.answer_for(&q.id))
                    .map(|a| a.to_string());
                Ok(TakeStepResponse {
                    step: TakeStepKind::Question,
                    question: view,
                    position: Some(PositionIndicator {
                        current: session.traversal.position as u32 + 1,
                        total,
                    }),
                    recorded_answer: recorded,
                    secret_code: None,
                })
            }
        }
    }
}

fn session_key(survey_id: &str, session_id: &str) -> String {
    format!("take:{}:{}", survey_id, session_id)
}

fn transition_lock_key(survey_id: &str, session_id: &str) -> String {
    format!("take:lock:{}:{}", survey_id, session_id)
}

fn finalize_lock_key(survey_id: &str, session_id: &str) -> String {
    format!("take:finalize:{}:{}", survey_id, session_id)
}

fn already_completed(code: String) -> TakeStepResponse {
    TakeStepResponse {
        step: TakeStepKind::AlreadyCompleted,
        question: None,
        position: None,
        recorded_answer: None,
        secret_code: Some(code),
    }
}

fn session_ttl_seconds() -> u64 {
    std::env::var("TAKE_SESSION_TTL_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_SESSION_TTL_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionType, SurveyType};
    use crate::services::session_cache::MemorySessionCache;
    use crate::services::store::MemoryStore;

    fn survey(survey_type: SurveyType) -> Survey {
        Survey {
            id: "s1".to_string(),
            owner_id: "u1".to_string(),
            title: "Feedback".to_string(),
            description: String::new(),
            status: SurveyStatus::Open,
            survey_type,
            secret_key: "key-1".to_string(),
            completion_secret_code: "CODE1234".to_string(),
            target_participants: 100,
            completed_responses: 0,
            in_progress_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn plain_question(id: &str, order: i32) -> Question {
        let mut q = Question::new(id, "s1", QuestionType::MultipleChoice);
        q.order = order;
        q.options = vec!["A".to_string(), "B".to_string()];
        q
    }

    async fn service_with(
        survey_type: SurveyType,
        questions: Vec<Question>,
    ) -> (TakeSurveyService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_survey(&survey(survey_type)).await.unwrap();
        store.replace_questions("s1", &questions).await.unwrap();
        let cache = Arc::new(MemorySessionCache::new());
        let checkpoints = CheckpointWriter::spawn(store.clone());
        (
            TakeSurveyService::new(store.clone(), cache, checkpoints),
            store,
        )
    }

    async fn answer_through(service: &TakeSurveyService, session_id: &str, count: usize) {
        for _ in 0..count {
            let step = service.start("key-1", session_id, "10.0.0.1").await.unwrap();
            let question = step.question.expect("question in view");
            service
                .submit_answer("key-1", session_id, &question.id, "A")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn paid_survey_starts_answering_directly() {
        let (service, store) =
            service_with(SurveyType::Paid, vec![plain_question("q0", 0)]).await;

        let step = service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        assert_eq!(step.step, TakeStepKind::Question);
        assert_eq!(store.response_count("s1"), 1);
    }

    #[tokio::test]
    async fn free_survey_requires_consent_before_response_row() {
        let (service, store) =
            service_with(SurveyType::Free, vec![plain_question("q0", 0)]).await;

        let step = service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        assert_eq!(step.step, TakeStepKind::PrivacyConsent);
        assert_eq!(store.response_count("s1"), 0);

        let step = service.confirm_consent("key-1", "sess").await.unwrap();
        assert_eq!(step.step, TakeStepKind::Question);
        assert_eq!(store.response_count("s1"), 1);
    }

    #[tokio::test]
    async fn closed_survey_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut s = survey(SurveyType::Free);
        s.status = SurveyStatus::Closed;
        store.insert_survey(&s).await.unwrap();
        let cache = Arc::new(MemorySessionCache::new());
        let service =
            TakeSurveyService::new(store.clone(), cache, CheckpointWriter::spawn(store.clone()));

        let err = service.start("key-1", "sess", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, TakeError::SurveyClosed));
    }

    #[tokio::test]
    async fn full_quota_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut s = survey(SurveyType::Free);
        s.target_participants = 2;
        s.completed_responses = 2;
        store.insert_survey(&s).await.unwrap();
        let cache = Arc::new(MemorySessionCache::new());
        let service =
            TakeSurveyService::new(store.clone(), cache, CheckpointWriter::spawn(store.clone()));

        let err = service.start("key-1", "sess", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, TakeError::QuotaFull));
    }

    // P4: a double submit yields exactly one completed row and the same code.
    #[tokio::test]
    async fn finalize_twice_is_idempotent() {
        let (service, store) =
            service_with(SurveyType::Paid, vec![plain_question("q0", 0)]).await;

        answer_through(&service, "sess", 1).await;

        let first = service.finalize("key-1", "sess").await.unwrap();
        let second = service.finalize("key-1", "sess").await.unwrap();

        assert_eq!(first.secret_code, "CODE1234");
        assert_eq!(first.secret_code, second.secret_code);
        assert_eq!(store.response_count("s1"), 1);
    }

    // P5: both durable paths failing must not reveal the code; a healthy
    // retry succeeds and then reveals it.
    #[tokio::test]
    async fn finalize_failure_reveals_nothing_until_retry_succeeds() {
        let (service, store) =
            service_with(SurveyType::Paid, vec![plain_question("q0", 0)]).await;

        answer_through(&service, "sess", 1).await;

        store.set_fail_updates(true);
        store.set_fail_creates(true);
        let err = service.finalize("key-1", "sess").await.unwrap_err();
        assert!(matches!(err, TakeError::SaveFailed));

        // still resumable, nothing completed, no code anywhere
        let step = service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        assert_eq!(step.step, TakeStepKind::ReadyToSubmit);
        assert!(step.secret_code.is_none());

        store.set_fail_updates(false);
        store.set_fail_creates(false);
        let ok = service.finalize("key-1", "sess").await.unwrap();
        assert_eq!(ok.secret_code, "CODE1234");
    }

    // P8: re-entry after completion short-circuits to the stored code
    // without creating another response.
    #[tokio::test]
    async fn completed_session_short_circuits_on_reload() {
        let (service, store) =
            service_with(SurveyType::Paid, vec![plain_question("q0", 0)]).await;

        answer_through(&service, "sess", 1).await;
        service.finalize("key-1", "sess").await.unwrap();
        let before = store.response_count("s1");

        let step = service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        assert_eq!(step.step, TakeStepKind::AlreadyCompleted);
        assert_eq!(step.secret_code.as_deref(), Some("CODE1234"));
        assert_eq!(store.response_count("s1"), before);
    }

    #[tokio::test]
    async fn completed_ip_short_circuits_other_sessions() {
        let (service, _store) =
            service_with(SurveyType::Paid, vec![plain_question("q0", 0)]).await;

        answer_through(&service, "sess", 1).await;
        service.finalize("key-1", "sess").await.unwrap();

        let step = service
            .start("key-1", "another-sess", "10.0.0.1")
            .await
            .unwrap();
        assert_eq!(step.step, TakeStepKind::AlreadyCompleted);
        assert_eq!(step.secret_code.as_deref(), Some("CODE1234"));
    }

    #[tokio::test]
    async fn checkpoint_failures_never_block_advancement() {
        let (service, store) = service_with(
            SurveyType::Paid,
            vec![plain_question("q0", 0), plain_question("q1", 1)],
        )
        .await;

        store.set_fail_updates(true);
        service.start("key-1", "sess", "10.0.0.1").await.unwrap();

        let step = service
            .submit_answer("key-1", "sess", "q0", "A")
            .await
            .unwrap();
        assert_eq!(step.step, TakeStepKind::Question);
        assert_eq!(step.question.unwrap().id, "q1");
    }

    #[tokio::test]
    async fn finalize_before_ready_is_rejected() {
        let (service, _store) = service_with(
            SurveyType::Paid,
            vec![plain_question("q0", 0), plain_question("q1", 1)],
        )
        .await;

        service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        let err = service.finalize("key-1", "sess").await.unwrap_err();
        assert!(matches!(err, TakeError::NotReadyToSubmit));
    }

    #[tokio::test]
    async fn abandon_marks_response_and_clears_session() {
        let (service, store) = service_with(
            SurveyType::Paid,
            vec![plain_question("q0", 0), plain_question("q1", 1)],
        )
        .await;

        service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        service
            .submit_answer("key-1", "sess", "q0", "A")
            .await
            .unwrap();
        service.abandon("key-1", "sess").await.unwrap();

        // background cleanup is fire-and-forget; wait for it to land
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
        loop {
            let abandoned = store
                .responses_for_survey("s1")
                .await
                .unwrap()
                .iter()
                .any(|r| r.status == ResponseStatus::Abandoned);
            if abandoned {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "abandonment never landed"
            );
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }

        // a fresh start begins a brand new traversal
        let step = service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        assert_eq!(step.step, TakeStepKind::Question);
        assert_eq!(step.question.unwrap().id, "q0");
    }

    #[tokio::test]
    async fn back_navigation_rehydrates_recorded_answer() {
        let (service, _store) = service_with(
            SurveyType::Paid,
            vec![plain_question("q0", 0), plain_question("q1", 1)],
        )
        .await;

        service.start("key-1", "sess", "10.0.0.1").await.unwrap();
        service
            .submit_answer("key-1", "sess", "q0", "B")
            .await
            .unwrap();

        let step = service.step_back("key-1", "sess").await.unwrap();
        assert_eq!(step.question.unwrap().id, "q0");
        assert_eq!(step.recorded_answer.as_deref(), Some("B"));
    }
}
