//! Explicit traversal state, serializable so a respondent session can be
//! parked in the session cache between HTTP calls and resumed on reload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::{AnswerRecord, BranchEndPolicy, Question};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    NotStarted,
    PrivacyConsent,
    Answering,
    ReadyToSubmit,
    Completed,
    Abandoned,
}

/// "We are inside this option's child sequence, having arrived via this
/// parent question." Child questions are captured at entry, already sorted
/// by `order`; the end policy is captured too so popping never needs to look
/// the parent up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchFrame {
    pub parent_question_id: String,
    /// Index of the opening question within its own list.
    pub parent_index: usize,
    pub option_label: String,
    pub questions: Vec<Question>,
    pub end_policy: BranchEndPolicy,
}

/// Full per-respondent traversal state. Transitions are pure functions in
/// [`super::transition`]; nothing here touches I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalState {
    pub status: EngineStatus,
    /// Cumulative answers in first-answer order; re-answering replaces the
    /// existing record in place.
    pub answers: Vec<AnswerRecord>,
    /// Index into the active list (top branch frame, else the root list).
    pub position: usize,
    pub branch_stack: Vec<BranchFrame>,
    /// Root-list indices bypassed because they belong to an untaken branch
    /// path. Recomputed from `answers` after every transition.
    pub skip_set: BTreeSet<usize>,
}

impl TraversalState {
    pub fn new() -> Self {
        Self {
            status: EngineStatus::NotStarted,
            answers: Vec::new(),
            position: 0,
            branch_stack: Vec::new(),
            skip_set: BTreeSet::new(),
        }
    }

    pub fn record_answer(&mut self, question_id: &str, answer: &str) {
        if let Some(existing) = self
            .answers
            .iter_mut()
            .find(|a| a.question_id == question_id)
        {
            existing.answer = answer.to_string();
        } else {
            self.answers.push(AnswerRecord {
                question_id: question_id.to_string(),
                answer: answer.to_string(),
            });
        }
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.answers
            .iter()
            .find(|a| a.question_id == question_id)
            .map(|a| a.answer.as_str())
    }

    pub fn in_branch(&self) -> bool {
        !self.branch_stack.is_empty()
    }
}

impl Default for TraversalState {
    fn default() -> Self {
        Self::new()
    }
}
