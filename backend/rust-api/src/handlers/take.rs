use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::engine::EngineError;
use crate::middlewares::rate_limit::extract_client_ip_from;
use crate::models::response::{
    AbandonRequest, ConsentRequest, FinalizeRequest, StartTakeRequest, StepBackRequest,
    SubmitTakeAnswerRequest,
};
use crate::services::{
    take_service::{TakeError, TakeSurveyService},
    AppState,
};

fn take_service(state: &AppState) -> TakeSurveyService {
    TakeSurveyService::new(
        state.store.clone(),
        state.cache.clone(),
        state.checkpoints.clone(),
    )
}

fn error_response(e: TakeError) -> (StatusCode, String) {
    let status = match &e {
        TakeError::SurveyNotFound | TakeError::SessionNotFound => StatusCode::NOT_FOUND,
        TakeError::SurveyClosed => StatusCode::GONE,
        TakeError::QuotaFull => StatusCode::CONFLICT,
        TakeError::TransitionInProgress | TakeError::NotReadyToSubmit => StatusCode::CONFLICT,
        // retryable: the complete button stays actionable
        TakeError::SaveFailed => StatusCode::SERVICE_UNAVAILABLE,
        TakeError::Engine(EngineError::QuestionMismatch { .. })
        | TakeError::Engine(EngineError::NotAnswering(_)) => StatusCode::CONFLICT,
        TakeError::Store(_) | TakeError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

pub async fn start_take(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StartTakeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let ip = extract_client_ip_from(&headers, &axum::http::Extensions::new());
    tracing::info!(session_id = %req.session_id, "Starting take session");

    let service = take_service(&state);
    match service.start(&secret_key, &req.session_id, &ip).await {
        Ok(step) => Ok((StatusCode::OK, Json(step))),
        Err(e) => {
            tracing::warn!("Failed to start take session: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn confirm_consent(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Json(req): Json<ConsentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = take_service(&state);
    match service.confirm_consent(&secret_key, &req.session_id).await {
        Ok(step) => Ok((StatusCode::OK, Json(step))),
        Err(e) => {
            tracing::warn!("Consent confirmation failed: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Json(req): Json<SubmitTakeAnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = take_service(&state);
    match service
        .submit_answer(&secret_key, &req.session_id, &req.question_id, &req.answer)
        .await
    {
        Ok(step) => Ok((StatusCode::OK, Json(step))),
        Err(e) => {
            tracing::warn!(question_id = %req.question_id, "Answer submission failed: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn step_back(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Json(req): Json<StepBackRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = take_service(&state);
    match service.step_back(&secret_key, &req.session_id).await {
        Ok(step) => Ok((StatusCode::OK, Json(step))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Json(req): Json<FinalizeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = take_service(&state);
    match service.finalize(&secret_key, &req.session_id).await {
        Ok(done) => Ok((StatusCode::OK, Json(done))),
        Err(e) => {
            tracing::warn!(session_id = %req.session_id, "Finalization failed: {}", e);
            Err(error_response(e))
        }
    }
}

/// Best-effort teardown hook (sendBeacon target); always cheap for the
/// client, failures carry no user-visible effect.
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Json(req): Json<AbandonRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = take_service(&state);
    match service.abandon(&secret_key, &req.session_id).await {
        Ok(()) => Ok((StatusCode::NO_CONTENT, ())),
        Err(e) => Err(error_response(e)),
    }
}
