//! Domain classification and the per-domain expertise document injected
//! into agent prompts (§4.G).

mod domain;
mod manager;

pub use domain::classify;
pub use manager::{ExpertiseManager, LearningChanges};
