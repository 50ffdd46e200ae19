pub mod editor;
pub mod flatten;

pub use editor::{question_type_cost, total_cost};
pub use flatten::{flatten_question_tree, validate_question_tree};
