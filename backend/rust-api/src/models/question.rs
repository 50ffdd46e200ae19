use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    MultipleSelect,
    Ranking,
    ShortAnswer,
    NumericRating,
    LikertScale,
    ImageChoice,
    ImageBanner,
    BranchingChoice,
    ChoiceWithOther,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::MultipleSelect => "multiple_select",
            QuestionType::Ranking => "ranking",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::NumericRating => "numeric_rating",
            QuestionType::LikertScale => "likert_scale",
            QuestionType::ImageChoice => "image_choice",
            QuestionType::ImageBanner => "image_banner",
            QuestionType::BranchingChoice => "branching_choice",
            QuestionType::ChoiceWithOther => "choice_with_other",
        }
    }

    /// Types that carry no selectable options.
    pub fn is_optionless(&self) -> bool {
        matches!(self, QuestionType::ShortAnswer | QuestionType::ImageBanner)
    }
}

/// Policy applied after the last question of an option's child sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchEndPolicy {
    #[default]
    EndSurvey,
    Continue,
}

/// A single prompt unit. Branching questions own, per option label, an
/// ordered child sequence (authoring tree shape) or a 1-based jump target
/// into the root sequence (flattened runtime shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stamped by the authoring save; client payloads may omit it.
    #[serde(default)]
    pub survey_id: String,
    pub question_type: QuestionType,
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Position among siblings. The engine sorts by this value, never by
    /// array position.
    pub order: i32,
    /// Option label -> ordered child questions. Non-empty only for
    /// `BranchingChoice`; renaming an option migrates its bucket.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub children: HashMap<String, Vec<Question>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub branch_end_types: HashMap<String, BranchEndPolicy>,
    /// Option label -> 1-based root position; 0 means "end survey"; absent
    /// means "advance sequentially". Out-of-range values are ignored.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub branch_targets: HashMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_descriptions: Vec<String>,
    /// Pricing weight; immaterial to traversal.
    #[serde(default)]
    pub cost: i64,
}

impl Question {
    pub fn new(id: impl Into<String>, survey_id: impl Into<String>, qtype: QuestionType) -> Self {
        Self {
            id: id.into(),
            survey_id: survey_id.into(),
            question_type: qtype,
            text: String::new(),
            options: Vec::new(),
            order: 0,
            children: HashMap::new(),
            branch_end_types: HashMap::new(),
            branch_targets: HashMap::new(),
            max_selections: None,
            image_urls: Vec::new(),
            image_descriptions: Vec::new(),
            cost: 0,
        }
    }

    pub fn is_branching(&self) -> bool {
        self.question_type == QuestionType::BranchingChoice
    }

    /// Children of one option, sorted by `order`.
    pub fn children_for(&self, option: &str) -> Vec<Question> {
        let mut bucket = self.children.get(option).cloned().unwrap_or_default();
        bucket.sort_by_key(|q| q.order);
        bucket
    }

    /// End policy for an option; `EndSurvey` when unset.
    pub fn end_policy_for(&self, option: &str) -> BranchEndPolicy {
        self.branch_end_types.get(option).copied().unwrap_or_default()
    }
}

/// Sort a question list the way the engine presents it.
pub fn sort_by_order(questions: &mut [Question]) {
    questions.sort_by_key(|q| q.order);
}
