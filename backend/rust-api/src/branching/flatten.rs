//! Compile the authored tree shape (children nested per option) down to the
//! flat runtime shape the traversal engine addresses by root position.
//!
//! Layout rule: a branching question's `Continue` buckets are packed
//! immediately after it in option order; `EndSurvey` buckets are moved to
//! the tail of the root sequence so that exhausting them ends the survey.
//! `branch_targets` is filled with the 1-based position of each bucket's
//! first question, or `0` for an explicit `EndSurvey` option with no
//! children. Options without children and without an explicit end policy
//! stay sequential (no entry).

use std::collections::{HashMap, HashSet};

use crate::models::question::sort_by_order;
use crate::models::{BranchEndPolicy, Question};

#[derive(Clone, Copy)]
enum Dest {
    Main,
    Tail,
}

enum Link {
    FirstChild { parent_id: String, option: String, child_id: String },
    EndNow { parent_id: String, option: String },
}

/// Flatten an authored question tree into a single root sequence with jump
/// targets. Emitted rows have `children` and `branch_end_types` cleared and
/// `order` rewritten to the sequence position. Explicitly authored
/// `branch_targets` on already-flat questions pass through untouched.
pub fn flatten_question_tree(roots: &[Question]) -> Vec<Question> {
    let mut sorted: Vec<Question> = roots.to_vec();
    sort_by_order(&mut sorted);

    let mut main: Vec<Question> = Vec::new();
    let mut tail: Vec<Question> = Vec::new();
    let mut links: Vec<Link> = Vec::new();

    for q in &sorted {
        expand_into(q, Dest::Main, &mut main, &mut tail, &mut links);
    }

    let mut flat = main;
    flat.append(&mut tail);

    let positions: HashMap<String, usize> = flat
        .iter()
        .enumerate()
        .map(|(idx, q)| (q.id.clone(), idx))
        .collect();

    for link in links {
        match link {
            Link::FirstChild {
                parent_id,
                option,
                child_id,
            } => {
                let Some(&child_pos) = positions.get(&child_id) else {
                    continue;
                };
                if let Some(parent) = flat.iter_mut().find(|q| q.id == parent_id) {
                    parent
                        .branch_targets
                        .insert(option, (child_pos + 1) as u32);
                }
            }
            Link::EndNow { parent_id, option } => {
                if let Some(parent) = flat.iter_mut().find(|q| q.id == parent_id) {
                    parent.branch_targets.insert(option, 0);
                }
            }
        }
    }

    for (idx, q) in flat.iter_mut().enumerate() {
        q.order = idx as i32;
    }

    flat
}

fn expand_into(
    q: &Question,
    dest: Dest,
    main: &mut Vec<Question>,
    tail: &mut Vec<Question>,
    links: &mut Vec<Link>,
) {
    let mut flat = q.clone();
    flat.children = HashMap::new();
    flat.branch_end_types = HashMap::new();

    match dest {
        Dest::Main => main.push(flat),
        Dest::Tail => tail.push(flat),
    }

    if !q.is_branching() {
        return;
    }

    for option in &q.options {
        let bucket = q.children_for(option);
        if bucket.is_empty() {
            // only an explicitly authored EndSurvey ends the survey here; an
            // option that simply has no follow-ups stays sequential
            if q.branch_end_types.get(option) == Some(&BranchEndPolicy::EndSurvey) {
                links.push(Link::EndNow {
                    parent_id: q.id.clone(),
                    option: option.clone(),
                });
            }
            continue;
        }

        links.push(Link::FirstChild {
            parent_id: q.id.clone(),
            option: option.clone(),
            child_id: bucket[0].id.clone(),
        });

        let child_dest = match q.end_policy_for(option) {
            BranchEndPolicy::Continue => Dest::Main,
            BranchEndPolicy::EndSurvey => Dest::Tail,
        };
        for child in &bucket {
            match child_dest {
                Dest::Main => expand_into(child, Dest::Main, main, tail, links),
                Dest::Tail => expand_into(child, Dest::Tail, main, tail, links),
            }
        }
    }
}

/// Structural validation run before saving an authored tree. Returns a list
/// of human-readable issues; an empty list means the tree is saveable.
pub fn validate_question_tree(roots: &[Question]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen_ids = HashSet::new();
    validate_level(roots, "root", &mut seen_ids, &mut issues);
    issues
}

fn validate_level(
    siblings: &[Question],
    level: &str,
    seen_ids: &mut HashSet<String>,
    issues: &mut Vec<String>,
) {
    let mut orders = HashSet::new();
    for q in siblings {
        if !seen_ids.insert(q.id.clone()) {
            issues.push(format!("duplicate question id '{}'", q.id));
        }
        if !orders.insert(q.order) {
            issues.push(format!(
                "duplicate order {} within {} sequence (question '{}')",
                q.order, level, q.id
            ));
        }

        if q.question_type.is_optionless() && !q.options.is_empty() {
            issues.push(format!(
                "question '{}' of type {} must not carry options",
                q.id,
                q.question_type.as_str()
            ));
        }

        if !q.is_branching() {
            if !q.children.is_empty() {
                issues.push(format!(
                    "non-branching question '{}' has child buckets",
                    q.id
                ));
            }
            if !q.branch_end_types.is_empty() {
                issues.push(format!(
                    "non-branching question '{}' has branch end policies",
                    q.id
                ));
            }
            continue;
        }

        let option_set: HashSet<&String> = q.options.iter().collect();
        for key in q.children.keys() {
            if !option_set.contains(key) {
                issues.push(format!(
                    "question '{}' has a child bucket for unknown option '{}'",
                    q.id, key
                ));
            }
        }
        for key in q.branch_end_types.keys() {
            if !option_set.contains(key) {
                issues.push(format!(
                    "question '{}' has an end policy for unknown option '{}'",
                    q.id, key
                ));
            }
        }

        for option in q.children.keys() {
            let sorted = q.children_for(option);
            validate_level(
                &sorted,
                &format!("'{}'/'{}'", q.id, option),
                seen_ids,
                issues,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionType;

    fn question(id: &str, order: i32, qtype: QuestionType) -> Question {
        let mut q = Question::new(id, "s1", qtype);
        q.order = order;
        q.text = format!("Question {}", id);
        if !qtype.is_optionless() {
            q.options = vec!["A".to_string(), "B".to_string()];
        }
        q
    }

    #[test]
    fn continue_bucket_packs_after_parent() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.children.insert(
            "A".to_string(),
            vec![
                question("a1", 0, QuestionType::MultipleChoice),
                question("a2", 1, QuestionType::MultipleChoice),
            ],
        );
        root.branch_end_types
            .insert("A".to_string(), BranchEndPolicy::Continue);
        let shared = question("q1", 1, QuestionType::ShortAnswer);

        let flat = flatten_question_tree(&[root, shared]);

        let ids: Vec<&str> = flat.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "a1", "a2", "q1"]);
        assert_eq!(flat[0].branch_targets["A"], 2);
        assert!(!flat[0].branch_targets.contains_key("B"));
        assert!(flat[0].children.is_empty());
        let orders: Vec<i32> = flat.iter().map(|q| q.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[test]
    fn end_survey_bucket_moves_to_tail() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.children.insert(
            "A".to_string(),
            vec![
                question("a1", 0, QuestionType::MultipleChoice),
                question("a2", 1, QuestionType::MultipleChoice),
            ],
        );
        root.branch_end_types
            .insert("A".to_string(), BranchEndPolicy::Continue);
        root.children.insert(
            "B".to_string(),
            vec![question("b1", 0, QuestionType::ShortAnswer)],
        );
        root.branch_end_types
            .insert("B".to_string(), BranchEndPolicy::EndSurvey);
        let shared = question("q1", 1, QuestionType::LikertScale);

        let flat = flatten_question_tree(&[root, shared]);

        let ids: Vec<&str> = flat.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "a1", "a2", "q1", "b1"]);
        assert_eq!(flat[0].branch_targets["A"], 2);
        assert_eq!(flat[0].branch_targets["B"], 5);
    }

    #[test]
    fn explicit_end_survey_without_children_targets_zero() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.branch_end_types
            .insert("B".to_string(), BranchEndPolicy::EndSurvey);

        let flat = flatten_question_tree(&[root]);

        assert_eq!(flat[0].branch_targets["B"], 0);
        assert!(!flat[0].branch_targets.contains_key("A"));
    }

    #[test]
    fn already_flat_targets_pass_through() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.options = vec!["X".to_string(), "Y".to_string()];
        root.branch_targets.insert("X".to_string(), 2);
        root.branch_targets.insert("Y".to_string(), 4);
        let rest: Vec<Question> = (1..5)
            .map(|i| question(&format!("q{}", i), i, QuestionType::MultipleChoice))
            .collect();

        let mut all = vec![root];
        all.extend(rest);
        let flat = flatten_question_tree(&all);

        assert_eq!(flat.len(), 5);
        assert_eq!(flat[0].branch_targets["X"], 2);
        assert_eq!(flat[0].branch_targets["Y"], 4);
    }

    #[test]
    fn nested_buckets_expand_recursively() {
        let mut inner = question("c1", 0, QuestionType::BranchingChoice);
        inner.children.insert(
            "A".to_string(),
            vec![question("g1", 0, QuestionType::ShortAnswer)],
        );
        inner
            .branch_end_types
            .insert("A".to_string(), BranchEndPolicy::Continue);

        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.children.insert("A".to_string(), vec![inner]);
        root.branch_end_types
            .insert("A".to_string(), BranchEndPolicy::Continue);

        let flat = flatten_question_tree(&[root]);

        let ids: Vec<&str> = flat.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "c1", "g1"]);
        assert_eq!(flat[1].branch_targets["A"], 3);
    }

    #[test]
    fn validation_flags_structural_problems() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.children.insert(
            "C".to_string(), // not an option
            vec![question("c1", 0, QuestionType::MultipleChoice)],
        );
        let mut plain = question("q1", 0, QuestionType::MultipleChoice); // dup order
        plain
            .children
            .insert("A".to_string(), vec![question("x1", 0, QuestionType::Ranking)]);

        let issues = validate_question_tree(&[root, plain]);

        assert!(issues.iter().any(|i| i.contains("unknown option 'C'")));
        assert!(issues.iter().any(|i| i.contains("duplicate order 0")));
        assert!(issues
            .iter()
            .any(|i| i.contains("non-branching question 'q1' has child buckets")));
    }

    #[test]
    fn validation_accepts_clean_tree() {
        let mut root = question("q0", 0, QuestionType::BranchingChoice);
        root.children.insert(
            "A".to_string(),
            vec![question("a1", 0, QuestionType::MultipleChoice)],
        );
        let issues = validate_question_tree(&[root, question("q1", 1, QuestionType::ShortAnswer)]);
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }
}
