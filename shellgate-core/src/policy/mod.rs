mod defaults;
mod evaluator;
mod parser;

pub use defaults::DEFAULT_DENY_PATTERNS;
pub use evaluator::{evaluate, Decision, PolicyMode, PolicyRuleSet};
pub use parser::{glob_match, parse_command};
