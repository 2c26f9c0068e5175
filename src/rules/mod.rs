//! Rule evaluator: pure, side-effect-free evaluation of AND/OR rule groups
//! against an intent's evaluation context.

pub mod evaluator;
pub mod path;

pub use evaluator::{evaluate_group, Rule, RuleGroup, RuleOperator, RuleTrace};
pub use path::{walk, PathValue};
