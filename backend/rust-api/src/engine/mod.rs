pub mod state;
pub mod transition;

pub use state::{BranchFrame, EngineStatus, TraversalState};
pub use transition::{Advance, EngineError};
