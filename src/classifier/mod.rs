//! Request classification: keyword rules → structured descriptor

mod cache;
#[allow(clippy::module_inception)]
mod classifier;
mod rules;

pub use classifier::{Classifier, ClassifierConfig, ClassifierStats};
pub use rules::{default_rules, is_known_tool, PatternRule, FALLBACK_WORKER, TOOL_CATALOG};
