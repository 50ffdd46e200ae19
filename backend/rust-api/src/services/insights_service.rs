//! Analytics for a survey: statistically computed per-question breakdowns
//! plus an optional narrative from the external LLM invocation API. The LLM
//! is a collaborator, not a dependency: when it fails the report degrades
//! to stats only.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::metrics::INSIGHTS_REQUESTED_TOTAL;
use crate::models::{Question, QuestionType, ResponseStatus, SurveyResponse};

use super::store::{StoreError, SurveyStore};

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error("Survey not found")]
    SurveyNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
pub struct SurveyInsights {
    pub survey_id: String,
    pub total_responses: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub abandoned: usize,
    pub completion_rate: f64,
    pub questions: Vec<QuestionBreakdown>,
    /// LLM-generated summary; absent when the LLM call fails or is not
    /// configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuestionBreakdown {
    pub question_id: String,
    pub text: String,
    pub question_type: QuestionType,
    pub answered: usize,
    /// Option label -> pick count. Multi-select answers contribute one count
    /// per selected label; free-text types keep only `answered`.
    pub option_counts: Vec<OptionCount>,
}

#[derive(Debug, Serialize)]
pub struct OptionCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
struct LlmSummaryRequest<'a> {
    survey_title: &'a str,
    completed: usize,
    completion_rate: f64,
    questions: &'a [QuestionBreakdown],
}

#[derive(Debug, Deserialize)]
struct LlmSummaryResponse {
    summary: String,
}

pub struct InsightsService {
    store: Arc<dyn SurveyStore>,
    http_client: Client,
    llm_api_url: String,
}

impl InsightsService {
    pub fn new(store: Arc<dyn SurveyStore>, llm_api_url: String) -> Self {
        Self {
            store,
            http_client: Client::new(),
            llm_api_url,
        }
    }

    pub async fn insights(&self, survey_id: &str) -> Result<SurveyInsights, InsightsError> {
        let survey = self
            .store
            .survey_by_id(survey_id)
            .await?
            .ok_or(InsightsError::SurveyNotFound)?;

        let questions = self.store.questions_for_survey(survey_id).await?;
        let responses = self.store.responses_for_survey(survey_id).await?;

        let mut insights = aggregate(survey_id, &questions, &responses);
        insights.narrative = self.request_narrative(&survey.title, &insights).await;

        INSIGHTS_REQUESTED_TOTAL
            .with_label_values(&[if insights.narrative.is_some() {
                "with_narrative"
            } else {
                "stats_only"
            }])
            .inc();

        Ok(insights)
    }

    async fn request_narrative(&self, title: &str, insights: &SurveyInsights) -> Option<String> {
        if self.llm_api_url.is_empty() {
            return None;
        }
        let url = format!("{}/v1/summaries", self.llm_api_url);

        let payload = LlmSummaryRequest {
            survey_title: title,
            completed: insights.completed,
            completion_rate: insights.completion_rate,
            questions: &insights.questions,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<LlmSummaryResponse>().await {
                    Ok(body) => Some(body.summary),
                    Err(e) => {
                        tracing::warn!("LLM summary response unparseable: {e}");
                        None
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!("LLM summary API returned {}", resp.status());
                None
            }
            Err(e) => {
                tracing::warn!("LLM summary API unreachable: {e}");
                None
            }
        }
    }
}

/// Pure aggregation over stored questions and responses.
fn aggregate(
    survey_id: &str,
    questions: &[Question],
    responses: &[SurveyResponse],
) -> SurveyInsights {
    let completed = responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Completed)
        .count();
    let in_progress = responses
        .iter()
        .filter(|r| r.status == ResponseStatus::InProgress)
        .count();
    let abandoned = responses
        .iter()
        .filter(|r| r.status == ResponseStatus::Abandoned)
        .count();

    let breakdowns = questions
        .iter()
        .map(|q| breakdown_for(q, responses))
        .collect();

    SurveyInsights {
        survey_id: survey_id.to_string(),
        total_responses: responses.len(),
        completed,
        in_progress,
        abandoned,
        completion_rate: if responses.is_empty() {
            0.0
        } else {
            completed as f64 / responses.len() as f64
        },
        questions: breakdowns,
        narrative: None,
    }
}

fn breakdown_for(question: &Question, responses: &[SurveyResponse]) -> QuestionBreakdown {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut answered = 0;

    for response in responses {
        let Some(record) = response
            .answers
            .iter()
            .find(|a| a.question_id == question.id)
        else {
            continue;
        };
        answered += 1;

        match question.question_type {
            QuestionType::MultipleSelect => {
                // comma-joined labels, one count per selection
                for label in record.answer.split(',') {
                    let label = label.trim();
                    if let Some(known) = question.options.iter().find(|o| o == &label) {
                        *counts.entry(known.as_str()).or_default() += 1;
                    }
                }
            }
            QuestionType::ShortAnswer | QuestionType::Ranking | QuestionType::ImageBanner => {
                // free-form or per-respondent orderings: counted, not bucketed
            }
            QuestionType::ImageChoice => {
                // stringified option index
                if let Ok(idx) = record.answer.parse::<usize>() {
                    if let Some(label) = question.options.get(idx) {
                        *counts.entry(label.as_str()).or_default() += 1;
                    }
                }
            }
            _ => {
                if let Some(known) = question.options.iter().find(|o| **o == record.answer) {
                    *counts.entry(known.as_str()).or_default() += 1;
                }
            }
        }
    }

    // preserve option order in the output
    let option_counts = question
        .options
        .iter()
        .filter_map(|label| {
            counts
                .get(label.as_str())
                .map(|&count| OptionCount {
                    label: label.clone(),
                    count,
                })
        })
        .collect();

    QuestionBreakdown {
        question_id: question.id.clone(),
        text: question.text.clone(),
        question_type: question.question_type,
        answered,
        option_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerRecord;
    use chrono::Utc;

    fn response(id: &str, status: ResponseStatus, answers: Vec<(&str, &str)>) -> SurveyResponse {
        SurveyResponse {
            id: id.to_string(),
            survey_id: "s1".to_string(),
            session_id: format!("sess-{}", id),
            status,
            answers: answers
                .into_iter()
                .map(|(q, a)| AnswerRecord {
                    question_id: q.to_string(),
                    answer: a.to_string(),
                })
                .collect(),
            ip_address: "10.0.0.1".to_string(),
            secret_code: None,
            last_activity: Utc::now(),
        }
    }

    #[test]
    fn aggregate_counts_statuses_and_options() {
        let mut q0 = Question::new("q0", "s1", QuestionType::MultipleChoice);
        q0.options = vec!["Red".to_string(), "Blue".to_string()];
        let mut q1 = Question::new("q1", "s1", QuestionType::MultipleSelect);
        q1.options = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let responses = vec![
            response(
                "r1",
                ResponseStatus::Completed,
                vec![("q0", "Red"), ("q1", "A,C")],
            ),
            response("r2", ResponseStatus::Completed, vec![("q0", "Red")]),
            response("r3", ResponseStatus::Abandoned, vec![("q0", "Blue")]),
            response("r4", ResponseStatus::InProgress, vec![]),
        ];

        let insights = aggregate("s1", &[q0, q1], &responses);

        assert_eq!(insights.total_responses, 4);
        assert_eq!(insights.completed, 2);
        assert_eq!(insights.abandoned, 1);
        assert_eq!(insights.in_progress, 1);
        assert!((insights.completion_rate - 0.5).abs() < f64::EPSILON);

        let q0_breakdown = &insights.questions[0];
        assert_eq!(q0_breakdown.answered, 3);
        assert_eq!(q0_breakdown.option_counts[0].label, "Red");
        assert_eq!(q0_breakdown.option_counts[0].count, 2);
        assert_eq!(q0_breakdown.option_counts[1].count, 1);

        let q1_breakdown = &insights.questions[1];
        assert_eq!(q1_breakdown.answered, 1);
        let labels: Vec<&str> = q1_breakdown
            .option_counts
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(labels, vec!["A", "C"]);
    }

    #[test]
    fn image_choice_answers_resolve_indices() {
        let mut q = Question::new("q0", "s1", QuestionType::ImageChoice);
        q.options = vec!["Left".to_string(), "Right".to_string()];

        let responses = vec![
            response("r1", ResponseStatus::Completed, vec![("q0", "1")]),
            response("r2", ResponseStatus::Completed, vec![("q0", "not-a-number")]),
        ];

        let insights = aggregate("s1", &[q], &responses);
        let breakdown = &insights.questions[0];
        assert_eq!(breakdown.answered, 2);
        assert_eq!(breakdown.option_counts.len(), 1);
        assert_eq!(breakdown.option_counts[0].label, "Right");
    }
}
