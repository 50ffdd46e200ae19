//! Authoring-side edits on a branching question's child tree.
//!
//! All operations are synchronous in-memory transforms and never fail:
//! invalid labels or indices leave the question untouched. The caller owns
//! committing the edited tree (save-time validation lives in
//! [`super::flatten`]).

use uuid::Uuid;

use crate::models::{BranchEndPolicy, Question, QuestionType};

/// Recursion guard for cost rollups; authored trees are shallow, anything
/// deeper than this is treated as malformed and cut off.
const MAX_COST_DEPTH: u32 = 32;

/// Base pricing weight per question type.
pub fn question_type_base_cost(qtype: QuestionType) -> i64 {
    match qtype {
        QuestionType::MultipleChoice => 10,
        QuestionType::MultipleSelect => 12,
        QuestionType::Ranking => 15,
        QuestionType::ShortAnswer => 10,
        QuestionType::NumericRating => 8,
        QuestionType::LikertScale => 8,
        QuestionType::ImageChoice => 18,
        QuestionType::ImageBanner => 5,
        QuestionType::BranchingChoice => 15,
        QuestionType::ChoiceWithOther => 12,
    }
}

/// Type cost at a given nesting depth. Nested questions are discounted 30%,
/// rounded to the nearest integer.
pub fn question_type_cost(qtype: QuestionType, depth: u32) -> i64 {
    let base = question_type_base_cost(qtype);
    if depth > 0 {
        (base as f64 * 0.7).round() as i64
    } else {
        base
    }
}

/// Append a default child question (`MultipleChoice`, two empty options) to
/// `option_label`'s bucket, creating the bucket if absent. The new child's
/// `order` equals the current bucket length.
pub fn add_child_question(question: &mut Question, option_label: &str) {
    if !question.is_branching() || !question.options.iter().any(|o| o == option_label) {
        return;
    }

    let bucket = question
        .children
        .entry(option_label.to_string())
        .or_default();

    let mut child = Question::new(
        Uuid::new_v4().to_string(),
        question.survey_id.clone(),
        QuestionType::MultipleChoice,
    );
    child.options = vec![String::new(), String::new()];
    child.order = bucket.len() as i32;
    child.cost = question_type_cost(QuestionType::MultipleChoice, 1);

    bucket.push(child);
}

/// Replace the child at `index` wholesale. No structural validation beyond
/// bounds; out-of-range indices are a no-op.
pub fn update_child_question(
    question: &mut Question,
    option_label: &str,
    index: usize,
    new_child: Question,
) {
    if let Some(bucket) = question.children.get_mut(option_label) {
        if index < bucket.len() {
            bucket[index] = new_child;
        }
    }
}

/// Remove the child at `index`. Sibling `order` values are intentionally not
/// renumbered; the traversal engine sorts by `order` and tolerates gaps.
pub fn remove_child_question(question: &mut Question, option_label: &str, index: usize) {
    if let Some(bucket) = question.children.get_mut(option_label) {
        if index < bucket.len() {
            bucket.remove(index);
        }
    }
}

/// Rename an option, migrating its child bucket and branch-end entry to the
/// new key. If `new_label` already has a bucket the move overwrites it
/// (last-write-wins); nothing is merged.
pub fn rename_option(question: &mut Question, old_label: &str, new_label: &str) {
    if old_label == new_label || new_label.is_empty() {
        return;
    }
    let Some(slot) = question.options.iter().position(|o| o == old_label) else {
        return;
    };

    question.options[slot] = new_label.to_string();

    if let Some(bucket) = question.children.remove(old_label) {
        question.children.insert(new_label.to_string(), bucket);
    }
    if let Some(policy) = question.branch_end_types.remove(old_label) {
        question.branch_end_types.insert(new_label.to_string(), policy);
    }
    if let Some(target) = question.branch_targets.remove(old_label) {
        question.branch_targets.insert(new_label.to_string(), target);
    }
}

/// Delete an option together with its child bucket and end policy. The
/// orphaned sub-tree is discarded, not reparented.
pub fn remove_option(question: &mut Question, label: &str) {
    let Some(slot) = question.options.iter().position(|o| o == label) else {
        return;
    };
    question.options.remove(slot);
    question.children.remove(label);
    question.branch_end_types.remove(label);
    question.branch_targets.remove(label);
}

/// Set what happens after the last question of an option's child sequence.
pub fn set_branch_end(question: &mut Question, option_label: &str, policy: BranchEndPolicy) {
    if !question.is_branching() || !question.options.iter().any(|o| o == option_label) {
        return;
    }
    question
        .branch_end_types
        .insert(option_label.to_string(), policy);
}

/// Recursive cost rollup: the question's own cost plus every descendant's
/// cost across all option buckets and nesting levels.
pub fn total_cost(question: &Question) -> i64 {
    total_cost_at(question, 0)
}

fn total_cost_at(question: &Question, depth: u32) -> i64 {
    if depth > MAX_COST_DEPTH {
        tracing::warn!(
            question_id = %question.id,
            "Cost rollup exceeded maximum nesting depth, truncating"
        );
        return 0;
    }

    let mut sum = question.cost;
    for bucket in question.children.values() {
        for child in bucket {
            sum += total_cost_at(child, depth + 1);
        }
    }
    sum
}
