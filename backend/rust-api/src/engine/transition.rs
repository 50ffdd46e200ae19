//! Pure transition functions over [`TraversalState`]. Everything here is
//! deterministic and I/O free: persistence, locking and checkpointing live
//! in the take service, which calls into this module on every
//! respondent-triggered event.

use thiserror::Error;

use crate::models::Question;

use super::state::{BranchFrame, EngineStatus, TraversalState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session is not accepting answers (status {0:?})")]
    NotAnswering(EngineStatus),
    #[error("answer targets question '{got}' but '{expected}' is in view")]
    QuestionMismatch { expected: String, got: String },
}

/// Outcome of a forward transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// `state.position` now points at the next question to present.
    Question,
    ReadyToSubmit,
}

/// The question currently in view, from the top branch frame or the root
/// list. `root` must already be sorted by `order`.
pub fn current_question(state: &TraversalState, root: &[Question]) -> Option<Question> {
    match state.branch_stack.last() {
        Some(frame) => frame.questions.get(state.position).cloned(),
        None => root.get(state.position).cloned(),
    }
}

/// Length of the active question list.
pub fn active_list_len(state: &TraversalState, root: &[Question]) -> usize {
    match state.branch_stack.last() {
        Some(frame) => frame.questions.len(),
        None => root.len(),
    }
}

/// Move a freshly consented (or paid-survey) session into `Answering`,
/// pointing at the first question. An empty survey goes straight to
/// `ReadyToSubmit`.
pub fn enter_answering(state: &mut TraversalState, root: &[Question]) -> Advance {
    state.position = 0;
    state.branch_stack.clear();
    if root.is_empty() {
        state.status = EngineStatus::ReadyToSubmit;
        Advance::ReadyToSubmit
    } else {
        state.status = EngineStatus::Answering;
        Advance::Question
    }
}

/// The core per-question transition: merge the answer, open a branch frame
/// or recompute the skip-set for a branching choice, then advance to the
/// next presentable question.
pub fn submit_answer(
    state: &mut TraversalState,
    root: &[Question],
    question_id: &str,
    answer: &str,
) -> Result<Advance, EngineError> {
    if state.status != EngineStatus::Answering {
        return Err(EngineError::NotAnswering(state.status));
    }
    let Some(current) = current_question(state, root) else {
        return Err(EngineError::NotAnswering(state.status));
    };
    if current.id != question_id {
        return Err(EngineError::QuestionMismatch {
            expected: current.id,
            got: question_id.to_string(),
        });
    }

    state.record_answer(question_id, answer);
    recompute_skip_set(state, root);

    if current.is_branching() {
        let bucket = current.children_for(answer);
        if !bucket.is_empty() {
            state.branch_stack.push(BranchFrame {
                parent_question_id: current.id.clone(),
                parent_index: state.position,
                option_label: answer.to_string(),
                end_policy: current.end_policy_for(answer),
                questions: bucket,
            });
            state.position = 0;
            return Ok(Advance::Question);
        }

        // flat scheme: 0 ends the survey immediately, a positive in-range
        // target is reached by advancing over the skip-set, anything else
        // advances sequentially
        if state.branch_stack.is_empty() {
            if let Some(&target) = current.branch_targets.get(answer) {
                if target == 0 {
                    state.status = EngineStatus::ReadyToSubmit;
                    return Ok(Advance::ReadyToSubmit);
                }
            }
        }
    }

    Ok(advance(state, root))
}

/// Step to the next unskipped question, popping exhausted branch frames and
/// resuming each parent immediately after its opener. Exhausting a frame
/// whose option was configured `EndSurvey` finishes the survey regardless of
/// remaining parent questions.
fn advance(state: &mut TraversalState, root: &[Question]) -> Advance {
    loop {
        let in_root = state.branch_stack.is_empty();
        let len = active_list_len(state, root);

        let mut next = state.position + 1;
        if in_root {
            while next < len && state.skip_set.contains(&next) {
                next += 1;
            }
        }

        if next < len {
            state.position = next;
            return Advance::Question;
        }

        match state.branch_stack.pop() {
            Some(frame) => {
                if frame.end_policy == crate::models::BranchEndPolicy::EndSurvey {
                    state.status = EngineStatus::ReadyToSubmit;
                    return Advance::ReadyToSubmit;
                }
                state.position = frame.parent_index;
                // loop: resume the parent sequence after the opener
            }
            None => {
                state.status = EngineStatus::ReadyToSubmit;
                return Advance::ReadyToSubmit;
            }
        }
    }
}

/// Step back one question. From `ReadyToSubmit` this re-opens the last
/// question in view; inside a branch at index 0 it pops back to the opener
/// itself. Returns the question now in view so staging state can be
/// re-hydrated from the recorded answer.
pub fn step_back(
    state: &mut TraversalState,
    root: &[Question],
) -> Result<Option<Question>, EngineError> {
    match state.status {
        EngineStatus::ReadyToSubmit => {
            state.status = EngineStatus::Answering;
            return Ok(current_question(state, root));
        }
        EngineStatus::Answering => {}
        other => return Err(EngineError::NotAnswering(other)),
    }

    let in_root = state.branch_stack.is_empty();
    let prev = if in_root {
        (0..state.position)
            .rev()
            .find(|i| !state.skip_set.contains(i))
    } else if state.position > 0 {
        Some(state.position - 1)
    } else {
        None
    };

    if let Some(prev) = prev {
        state.position = prev;
        return Ok(current_question(state, root));
    }

    if let Some(frame) = state.branch_stack.pop() {
        // land on the question that opened this branch, not on index 0
        state.position = frame.parent_index;
    }
    Ok(current_question(state, root))
}

/// Rebuild the skip-set from every answered branching question in the root
/// list. For each such question with boundary `M` = the maximum valid
/// 1-based target over all of its options, every unchosen option's target
/// `t` contributes indices `t..=M`, and the chosen option's own target is
/// removed, the "max of the unchosen targets" boundary rule. Recomputing
/// from scratch keeps the set honest after back-navigation re-answers.
/// Out-of-range targets are ignored entirely.
pub fn recompute_skip_set(state: &mut TraversalState, root: &[Question]) {
    state.skip_set.clear();
    let len = root.len() as u32;

    for question in root {
        if !question.is_branching() {
            continue;
        }
        let Some(chosen) = state.answer_for(&question.id).map(str::to_owned) else {
            continue;
        };

        let valid: Vec<(&String, u32)> = question
            .options
            .iter()
            .filter_map(|opt| {
                question
                    .branch_targets
                    .get(opt)
                    .filter(|&&t| t >= 1 && t <= len)
                    .map(|&t| (opt, t))
            })
            .collect();

        let Some(max_target) = valid.iter().map(|&(_, t)| t).max() else {
            continue;
        };
        let selected = valid
            .iter()
            .find(|(opt, _)| opt.as_str() == chosen)
            .map(|&(_, t)| (t - 1) as usize);

        for &(opt, target) in &valid {
            if opt.as_str() == chosen {
                continue;
            }
            for idx in (target - 1)..=(max_target - 1) {
                state.skip_set.insert(idx as usize);
            }
        }
        if let Some(selected) = selected {
            state.skip_set.remove(&selected);
        }
    }
}
