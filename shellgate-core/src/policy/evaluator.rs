use tracing::error;

use crate::policy::defaults::DEFAULT_DENY_PATTERNS;
use crate::policy::parser::{glob_match, parse_command};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyMode {
    Allowlist,
    Denylist,
}

/// Configuration consumed (not produced) by the core; built by whatever
/// owns host/tenant policy configuration.
#[derive(Clone, Debug)]
pub struct PolicyRuleSet {
    pub mode: PolicyMode,
    pub allow_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
    pub active: bool,
}

impl PolicyRuleSet {
    pub fn denylist(deny_patterns: Vec<String>) -> Self {
        Self {
            mode: PolicyMode::Denylist,
            allow_patterns: Vec::new(),
            deny_patterns,
            active: true,
        }
    }

    pub fn allowlist(allow_patterns: Vec<String>) -> Self {
        Self {
            mode: PolicyMode::Allowlist,
            allow_patterns,
            deny_patterns: Vec::new(),
            active: true,
        }
    }

    /// The default denylist is additive, never replaced by configuration
    /// (see `DESIGN.md` for the Open Question resolution this implements).
    fn effective_deny_patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<&str> = DEFAULT_DENY_PATTERNS.to_vec();
        patterns.extend(self.deny_patterns.iter().map(String::as_str));
        patterns
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Blocked { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Evaluates one submitted line against a rule set. Never returns an
/// `Err`: internal parser faults fail open, favoring availability over
/// strict enforcement, and are logged at error level instead.
pub fn evaluate(line: &str, rule_set: Option<&PolicyRuleSet>) -> Decision {
    let Some(rule_set) = rule_set else {
        return Decision::Allowed;
    };
    if !rule_set.active {
        return Decision::Allowed;
    }

    let base_commands = match std::panic::catch_unwind(|| parse_command(line)) {
        Ok(commands) => commands,
        Err(_) => {
            error!(command_text = %line, "policy parser panicked, failing open");
            return Decision::Allowed;
        }
    };
    if base_commands.is_empty() {
        return Decision::Allowed;
    }

    match rule_set.mode {
        // An allowlist with no configured patterns allows everything; it
        // never falls back to the denylist.
        PolicyMode::Allowlist if rule_set.allow_patterns.is_empty() => Decision::Allowed,
        PolicyMode::Allowlist => {
            for base_cmd in &base_commands {
                let matched = rule_set
                    .allow_patterns
                    .iter()
                    .any(|pattern| glob_match(base_cmd, pattern));
                if !matched {
                    return Decision::Blocked {
                        reason: format!("command '{base_cmd}' not in allowlist"),
                    };
                }
            }
            Decision::Allowed
        }
        PolicyMode::Denylist => {
            let deny_patterns = rule_set.effective_deny_patterns();
            for base_cmd in &base_commands {
                if let Some(pattern) = deny_patterns
                    .iter()
                    .find(|pattern| glob_match(base_cmd, pattern))
                {
                    return Decision::Blocked {
                        reason: format!("command '{base_cmd}' matched deny rule '{pattern}'"),
                    };
                }
            }
            Decision::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rule_set_allows_everything() {
        assert_eq!(evaluate("rm -rf /", None), Decision::Allowed);
    }

    #[test]
    fn inactive_rule_set_allows_everything() {
        let mut rules = PolicyRuleSet::denylist(vec!["ls".into()]);
        rules.active = false;
        assert_eq!(evaluate("ls", Some(&rules)), Decision::Allowed);
    }

    #[test]
    fn denylist_blocks_on_first_match() {
        let rules = PolicyRuleSet::denylist(vec!["curl*".into()]);
        let decision = evaluate("curl http://evil", Some(&rules));
        assert_eq!(
            decision,
            Decision::Blocked {
                reason: "command 'curl' matched deny rule 'curl*'".into()
            }
        );
    }

    #[test]
    fn default_deny_patterns_apply_even_with_empty_configured_list() {
        let rules = PolicyRuleSet::denylist(Vec::new());
        assert!(!evaluate("rm -rf /tmp/x", Some(&rules)).is_allowed());
    }

    #[test]
    fn allowlist_requires_every_command_to_match() {
        let rules = PolicyRuleSet::allowlist(vec!["ls".into(), "cat".into()]);
        assert!(evaluate("ls | cat", Some(&rules)).is_allowed());
        let decision = evaluate("ls | rm", Some(&rules));
        assert_eq!(
            decision,
            Decision::Blocked {
                reason: "command 'rm' not in allowlist".into()
            }
        );
    }

    #[test]
    fn allowlist_with_no_patterns_allows_everything() {
        let rules = PolicyRuleSet::allowlist(Vec::new());
        assert!(evaluate("rm -rf /tmp", Some(&rules)).is_allowed());
    }

    #[test]
    fn monotonicity_adding_deny_pattern_never_unblocks() {
        let narrow = PolicyRuleSet::denylist(vec!["foo".into()]);
        let wider = PolicyRuleSet::denylist(vec!["foo".into(), "bar".into()]);
        if !evaluate("bar", Some(&narrow)).is_allowed() {
            assert!(!evaluate("bar", Some(&wider)).is_allowed());
        }
    }
}
