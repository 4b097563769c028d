//! Typed view over the pipeline's environment-variable configuration.
//!
//! Every knob described in §6 is read once at startup via [`PipelineConfig::from_env`]
//! and carried around as a plain struct rather than re-read with `std::env::var`
//! scattered through the codebase.

use crate::error::{Error, Result};
use std::time::Duration;

/// All tunables the pipeline reads from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum fraction (0.0-1.0 expressed as a threshold count) of placeholders
    /// allowed to fail ETL before a document is still assembled with gaps.
    pub max_failed_placeholders_for_doc: u32,
    /// How many placeholder analyses may run concurrently within one execution.
    pub agent_concurrency: usize,
    /// Hard ceiling on PTAV loop iterations per placeholder.
    pub agent_max_iterations: u32,
    /// Per-call LLM request timeout.
    pub llm_timeout: Duration,
    /// Per-call SQL execution timeout.
    pub sql_execute_timeout: Duration,
    /// Whole-execution wall-clock budget.
    pub execution_wall_clock: Duration,
    /// Whether the primary (S3) storage backend is enabled; when false, every
    /// write/read goes straight to the fallback.
    pub storage_primary_enabled: bool,
    /// `{tenant}`/`{slug}`/`{date}`/`{name}` template used to derive object keys.
    pub storage_object_key_template: String,
    /// Minimum time a placeholder must sit since its last analysis before it is
    /// eligible for re-analysis; 0 means always eligible (resolved Open Question).
    pub placeholder_reanalyze_cooldown: Duration,
    /// Number of sentences of surrounding template text included as context
    /// when deriving SQL for a placeholder (resolved Open Question).
    pub placeholder_context_sentences: usize,
}

impl PipelineConfig {
    /// Read configuration from the process environment, applying the same
    /// defaults documented in §6 when a variable is unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_failed_placeholders_for_doc: parse_env_or(
                "REPORT_MAX_FAILED_PLACEHOLDERS_FOR_DOC",
                0,
            )?,
            agent_concurrency: parse_env_or("AGENT_CONCURRENCY", 1)?,
            agent_max_iterations: parse_env_or("AGENT_MAX_ITERATIONS", 15)?,
            llm_timeout: Duration::from_secs(parse_env_or("LLM_TIMEOUT_SECONDS", 120)?),
            sql_execute_timeout: Duration::from_secs(parse_env_or(
                "SQL_EXECUTE_TIMEOUT_SECONDS",
                60,
            )?),
            execution_wall_clock: Duration::from_secs(parse_env_or(
                "EXECUTION_WALL_CLOCK_SECONDS",
                600,
            )?),
            storage_primary_enabled: parse_env_or("STORAGE_PRIMARY_ENABLED", true)?,
            storage_object_key_template: std::env::var("STORAGE_OBJECT_KEY_TEMPLATE")
                .unwrap_or_else(|_| "reports/{tenant}/{slug}/{date}-{name}.docx".to_string()),
            placeholder_reanalyze_cooldown: Duration::from_secs(parse_env_or(
                "PLACEHOLDER_REANALYZE_COOLDOWN_SECONDS",
                0,
            )?),
            placeholder_context_sentences: parse_env_or("PLACEHOLDER_CONTEXT_SENTENCES", 3)?,
        })
    }

    /// Configuration tuned for fast, deterministic tests: short timeouts,
    /// single-threaded agent concurrency, and no reanalyze cooldown.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            max_failed_placeholders_for_doc: 0,
            agent_concurrency: 1,
            agent_max_iterations: 15,
            llm_timeout: Duration::from_secs(5),
            sql_execute_timeout: Duration::from_secs(5),
            execution_wall_clock: Duration::from_secs(30),
            storage_primary_enabled: true,
            storage_object_key_template: "reports/{tenant}/{slug}/{date}-{name}.docx".to_string(),
            placeholder_reanalyze_cooldown: Duration::from_secs(0),
            placeholder_context_sentences: 3,
        }
    }

    /// Render an object key for a `(tenant, task_slug, date, friendly_name)`
    /// tuple using `storage_object_key_template`. Identical inputs always
    /// render to the identical key, independent of execution or artifact id.
    #[must_use]
    pub fn render_object_key(&self, tenant: &str, task_slug: &str, date: &str, friendly_name: &str) -> String {
        self.storage_object_key_template
            .replace("{tenant}", tenant)
            .replace("{slug}", task_slug)
            .replace("{date}", date)
            .replace("{name}", friendly_name)
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Configuration(format!("{key}: invalid value '{raw}': {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => Err(Error::Configuration(format!(
            "{key}: value is not valid unicode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values_when_unset() {
        let cfg = PipelineConfig::for_tests();
        assert_eq!(cfg.agent_max_iterations, 15);
        assert_eq!(cfg.placeholder_context_sentences, 3);
    }

    #[test]
    fn render_object_key_substitutes_all_four_placeholders() {
        let cfg = PipelineConfig::for_tests();
        let key = cfg.render_object_key("acme-corp", "monthly-sales", "2026-08-01", "Monthly Sales Report");
        assert_eq!(key, "reports/acme-corp/monthly-sales/2026-08-01-Monthly Sales Report.docx");
    }

    #[test]
    fn render_object_key_is_deterministic_for_identical_inputs() {
        let cfg = PipelineConfig::for_tests();
        let a = cfg.render_object_key("acme-corp", "monthly-sales", "2026-08-01", "Monthly Sales Report");
        let b = cfg.render_object_key("acme-corp", "monthly-sales", "2026-08-01", "Monthly Sales Report");
        assert_eq!(a, b);
    }
}
