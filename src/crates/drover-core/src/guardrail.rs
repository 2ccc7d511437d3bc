//! Input/output guardrails
//!
//! Predicates over raw text that can block a call. Rules are static per
//! agent; the first failing rule is fatal for the current call and surfaces
//! as `guardrail-input` or `guardrail-output` with `[position] name: reason`.

use crate::error::{CoreError, Result};
use std::sync::Arc;

/// Where a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Input,
    Output,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Input => f.write_str("input"),
            Position::Output => f.write_str("output"),
        }
    }
}

/// A predicate over text; `Err(reason)` blocks the call.
pub type Predicate = Arc<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// A named rule applied at one position.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub position: Position,
    predicate: Predicate,
}

impl Rule {
    pub fn new<F>(name: impl Into<String>, position: Position, predicate: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            position,
            predicate: Arc::new(predicate),
        }
    }

    /// Rule over user input.
    pub fn input<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self::new(name, Position::Input, predicate)
    }

    /// Rule over final output.
    pub fn output<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self::new(name, Position::Output, predicate)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("position", &self.position)
            .finish()
    }
}

/// Ordered set of rules evaluated per call.
#[derive(Debug, Clone, Default)]
pub struct GuardrailEngine {
    rules: Vec<Rule>,
}

impl GuardrailEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate all rules at `position` in order; the first failure wins.
    pub fn check(&self, position: Position, text: &str) -> Result<()> {
        for rule in self.rules.iter().filter(|r| r.position == position) {
            if let Err(reason) = (rule.predicate)(text) {
                return Err(match position {
                    Position::Input => CoreError::GuardrailInput {
                        name: rule.name.clone(),
                        reason,
                    },
                    Position::Output => CoreError::GuardrailOutput {
                        name: rule.name.clone(),
                        reason,
                    },
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GuardrailEngine {
        GuardrailEngine::new()
            .with_rule(Rule::input("non_empty", |text| {
                if text.trim().is_empty() {
                    Err("message is empty".to_string())
                } else {
                    Ok(())
                }
            }))
            .with_rule(Rule::input("max_len", |text| {
                if text.len() > 100 {
                    Err("message too long".to_string())
                } else {
                    Ok(())
                }
            }))
            .with_rule(Rule::output("no_secrets", |text| {
                if text.contains("SECRET") {
                    Err("leaked a secret".to_string())
                } else {
                    Ok(())
                }
            }))
    }

    #[test]
    fn test_passing_input() {
        engine().check(Position::Input, "hello").unwrap();
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let err = engine().check(Position::Input, "   ").unwrap_err();
        match err {
            CoreError::GuardrailInput { name, reason } => {
                assert_eq!(name, "non_empty");
                assert_eq!(reason, "message is empty");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_message_format() {
        let err = engine().check(Position::Output, "the SECRET plan").unwrap_err();
        assert_eq!(
            err.to_string(),
            "guardrail violation [output] no_secrets: leaked a secret"
        );
    }

    #[test]
    fn test_positions_are_independent() {
        // Output rules don't run on input.
        engine().check(Position::Input, "contains SECRET word").unwrap();
    }
}
