//! Orchestrator configuration from environment variables.
//!
//! # Environment Variables
//!
//! - `BASIS_DB_DIR` — directory for the SQLite stores (default `./basis-data`)
//! - `BASIS_SIGNING_KEY_PATH` — path to the shared signing key file
//! - `BASIS_CONFLICT_STRATEGY` — `deny-overrides` (default),
//!   `allow-overrides`, `first-match` or `priority-based`
//! - `BASIS_DEFAULT_ACTION` — decision when nothing matches (default `allow`)
//! - `BASIS_ARCHIVE_AFTER_DAYS` — archive window (default 30)
//! - `BASIS_RETENTION_DAYS` — purge window (default 365)
//! - `BASIS_PRE_TIMEOUT_MS` / `BASIS_PRE_CAP_MS` — pre-action validator
//!   budgets (defaults 100 / 500)
//! - `BASIS_POST_TIMEOUT_MS` / `BASIS_POST_CAP_MS` — post-action validator
//!   budgets (defaults 200 / 2000)

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::ConflictStrategy;
use crate::errors::GovernanceError;
use crate::semantic::service::ValidatorBudgets;
use crate::types::DecisionAction;

/// Fully resolved orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub db_dir: PathBuf,
    pub signing_key_path: Option<PathBuf>,
    pub strategy: ConflictStrategy,
    pub default_action: DecisionAction,
    pub archive_after_days: i64,
    pub retention_days: i64,
    pub budgets: ValidatorBudgets,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("./basis-data"),
            signing_key_path: None,
            strategy: ConflictStrategy::DenyOverrides,
            default_action: DecisionAction::Allow,
            archive_after_days: 30,
            retention_days: 365,
            budgets: ValidatorBudgets::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the environment, falling back to defaults.
    /// Malformed values are config errors, not silent fallbacks.
    pub fn from_env() -> Result<Self, GovernanceError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("BASIS_DB_DIR") {
            config.db_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("BASIS_SIGNING_KEY_PATH") {
            config.signing_key_path = Some(PathBuf::from(path));
        }
        if let Ok(raw) = std::env::var("BASIS_CONFLICT_STRATEGY") {
            config.strategy = raw.parse().map_err(GovernanceError::Config)?;
        }
        if let Ok(raw) = std::env::var("BASIS_DEFAULT_ACTION") {
            config.default_action = match raw.as_str() {
                "allow" => DecisionAction::Allow,
                "deny" => DecisionAction::Deny,
                other => {
                    return Err(GovernanceError::Config(format!(
                        "BASIS_DEFAULT_ACTION must be allow or deny, got '{other}'"
                    )));
                }
            };
        }
        config.archive_after_days = env_i64("BASIS_ARCHIVE_AFTER_DAYS", config.archive_after_days)?;
        config.retention_days = env_i64("BASIS_RETENTION_DAYS", config.retention_days)?;

        config.budgets.pre_per_validator =
            env_duration_ms("BASIS_PRE_TIMEOUT_MS", config.budgets.pre_per_validator)?;
        config.budgets.pre_hard_cap =
            env_duration_ms("BASIS_PRE_CAP_MS", config.budgets.pre_hard_cap)?;
        config.budgets.post_per_validator =
            env_duration_ms("BASIS_POST_TIMEOUT_MS", config.budgets.post_per_validator)?;
        config.budgets.post_hard_cap =
            env_duration_ms("BASIS_POST_CAP_MS", config.budgets.post_hard_cap)?;

        if config.retention_days < config.archive_after_days {
            return Err(GovernanceError::Config(format!(
                "retention ({}) must not be shorter than the archive window ({})",
                config.retention_days, config.archive_after_days
            )));
        }
        Ok(config)
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.db_dir.join("audit.db")
    }

    pub fn trust_db_path(&self) -> PathBuf {
        self.db_dir.join("trust.db")
    }

    pub fn policy_db_path(&self) -> PathBuf {
        self.db_dir.join("policy.db")
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64, GovernanceError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| GovernanceError::Config(format!("{name} must be an integer, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms(name: &str, default: Duration) -> Result<Duration, GovernanceError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| GovernanceError::Config(format!("{name} must be milliseconds, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}
