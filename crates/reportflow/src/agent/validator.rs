//! Checks accumulated pool state and observation history against the PTAV
//! loop's goal.

use crate::model::Observation;
use crate::resource_pool::{ResourcePool, ResourceValue};

/// Result of a validation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub goal_achieved: bool,
    pub reason: String,
}

/// Which goal the validator is checking state against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationGoal {
    /// Generating fresh SQL from scratch.
    Generate,
    /// Validating (and possibly executing) pre-existing SQL.
    ValidateExisting { require_execution: bool },
}

/// Checks `sql:current` and the most recent relevant observations.
pub struct Validator;

impl Validator {
    /// Evaluate whether `goal` has been met given the current pool and
    /// observation history.
    #[must_use]
    pub fn check(goal: ValidationGoal, pool: &ResourcePool, history: &[Observation]) -> ValidationOutcome {
        let Some(ResourceValue::SqlDraft(_)) = pool.get("sql:current") else {
            return ValidationOutcome {
                goal_achieved: false,
                reason: "no sql:current in pool".to_string(),
            };
        };

        let last_validate = history
            .iter()
            .rev()
            .find(|o| o.tool_name == "sql.validate");
        let Some(validate_obs) = last_validate else {
            return ValidationOutcome {
                goal_achieved: false,
                reason: "sql.validate has not been run".to_string(),
            };
        };
        let validated = validate_obs.success
            && validate_obs
                .result
                .get("valid")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
        if !validated {
            return ValidationOutcome {
                goal_achieved: false,
                reason: "last sql.validate reported invalid".to_string(),
            };
        }

        let require_execution = matches!(
            goal,
            ValidationGoal::ValidateExisting { require_execution: true }
        );
        if require_execution || matches!(goal, ValidationGoal::Generate) {
            let last_execute = history.iter().rev().find(|o| o.tool_name == "sql.execute");
            match last_execute {
                Some(obs) if obs.success => {
                    let row_count_ok = obs
                        .result
                        .get("row_count")
                        .and_then(serde_json::Value::as_i64)
                        .is_some_and(|n| n >= 0);
                    if !row_count_ok {
                        return ValidationOutcome {
                            goal_achieved: false,
                            reason: "sql.execute did not report a row_count".to_string(),
                        };
                    }
                }
                Some(_) => {
                    return ValidationOutcome {
                        goal_achieved: false,
                        reason: "last sql.execute failed".to_string(),
                    }
                }
                None => {
                    return ValidationOutcome {
                        goal_achieved: false,
                        reason: "sql.execute has not been run".to_string(),
                    }
                }
            }
        }

        ValidationOutcome {
            goal_achieved: true,
            reason: "sql validated and executable".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_ok() -> Observation {
        Observation {
            tool_name: "sql.validate".to_string(),
            success: true,
            result: serde_json::json!({"valid": true, "issues": []}),
            error: None,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn fails_without_sql_current() {
        let pool = ResourcePool::new();
        let outcome = Validator::check(ValidationGoal::Generate, &pool, &[]);
        assert!(!outcome.goal_achieved);
    }

    #[test]
    fn generate_goal_requires_execution() {
        let pool = ResourcePool::new();
        pool.put("sql:current", ResourceValue::SqlDraft("SELECT 1".into()));
        let history = vec![validate_ok()];
        let outcome = Validator::check(ValidationGoal::Generate, &pool, &history);
        assert!(!outcome.goal_achieved);
        assert!(outcome.reason.contains("sql.execute"));
    }

    #[test]
    fn generate_goal_succeeds_after_validate_and_execute() {
        let pool = ResourcePool::new();
        pool.put("sql:current", ResourceValue::SqlDraft("SELECT 1".into()));
        let history = vec![
            validate_ok(),
            Observation {
                tool_name: "sql.execute".to_string(),
                success: true,
                result: serde_json::json!({"row_count": 1}),
                error: None,
                elapsed_ms: 2,
            },
        ];
        let outcome = Validator::check(ValidationGoal::Generate, &pool, &history);
        assert!(outcome.goal_achieved);
    }

    #[test]
    fn validate_existing_without_required_execution_succeeds_on_validate_alone() {
        let pool = ResourcePool::new();
        pool.put("sql:current", ResourceValue::SqlDraft("SELECT 1".into()));
        let history = vec![validate_ok()];
        let outcome = Validator::check(
            ValidationGoal::ValidateExisting { require_execution: false },
            &pool,
            &history,
        );
        assert!(outcome.goal_achieved);
    }
}
