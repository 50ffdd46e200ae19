use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::models::Question;
use crate::services::{
    insights_service::{InsightsError, InsightsService},
    survey_service::{AuthoringError, CreateSurveyRequest, SetStatusRequest, SurveyService},
    AppState,
};

fn survey_service(state: &AppState) -> SurveyService {
    SurveyService::new(state.store.clone())
}

fn error_response(e: AuthoringError) -> (StatusCode, String) {
    let status = match &e {
        AuthoringError::SurveyNotFound => StatusCode::NOT_FOUND,
        AuthoringError::InvalidPayload(_) | AuthoringError::InvalidQuestionTree { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AuthoringError::InvalidStatusTransition { .. } => StatusCode::CONFLICT,
        AuthoringError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

pub async fn create_survey(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSurveyRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = survey_service(&state);
    match service.create_survey(req).await {
        Ok(survey) => Ok((StatusCode::CREATED, Json(survey))),
        Err(e) => {
            tracing::error!("Failed to create survey: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn get_survey(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = survey_service(&state);
    match service.survey(&survey_id).await {
        Ok(survey) => Ok((StatusCode::OK, Json(survey))),
        Err(e) => Err(error_response(e)),
    }
}

/// Authoring save: the full question tree is validated, priced, compiled to
/// the flat runtime shape and persisted wholesale.
pub async fn put_questions(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
    Json(questions): Json<Vec<Question>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = survey_service(&state);
    match service.save_questions(&survey_id, questions).await {
        Ok(saved) => Ok((StatusCode::OK, Json(saved))),
        Err(e) => {
            tracing::warn!(survey_id = %survey_id, "Question save rejected: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn get_questions(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = survey_service(&state);
    match service.questions(&survey_id).await {
        Ok(questions) => Ok((StatusCode::OK, Json(questions))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = survey_service(&state);
    match service.set_status(&survey_id, req.status).await {
        Ok(survey) => Ok((StatusCode::OK, Json(survey))),
        Err(e) => {
            tracing::warn!(survey_id = %survey_id, "Status transition rejected: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn get_insights(
    State(state): State<Arc<AppState>>,
    Path(survey_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = InsightsService::new(state.store.clone(), state.config.llm_api_url.clone());
    match service.insights(&survey_id).await {
        Ok(insights) => Ok((StatusCode::OK, Json(insights))),
        Err(InsightsError::SurveyNotFound) => {
            Err((StatusCode::NOT_FOUND, "Survey not found".to_string()))
        }
        Err(e) => {
            tracing::error!("Failed to build insights: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
