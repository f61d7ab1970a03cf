//! Configuration management for cyberstrike.
//!
//! Configuration can be set via environment variables:
//! - `OPENAI_API_KEY` - Required. Credential for the chat-completions endpoint.
//! - `OPENAI_BASE_URL` - Optional. Endpoint base URL. Defaults to `https://api.openai.com/v1`.
//! - `OPENAI_MODEL` - Optional. Model identifier. Defaults to `gpt-4o`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `DATABASE_PATH` - Optional. SQLite file. Defaults to `data/cyberstrike.db`; empty keeps everything in memory.
//! - `MAX_ITERATIONS` - Optional. Agent loop iteration cap. Defaults to `10`.
//! - `TASK_TIMEOUT_SECS` - Optional. Conversational run timeout. Defaults to `36000`.
//! - `BATCH_TASK_TIMEOUT_SECS` - Optional. Per batch task timeout. Defaults to `1800`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per tool process timeout. Defaults to `600`.
//! - `COMPLETED_TASK_HISTORY` - Optional. Completed tasks kept for inspection. Defaults to `50`.
//! - `ROLES_PATH` - Optional. YAML file with named roles.
//! - `SKILLS_DIR` - Optional. Directory of skill documents.
//! - `KNOWLEDGE_DIR` - Optional. Directory of knowledge base documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::RunPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to load roles from {}: {message}", .path.display())]
    RolesFile { path: PathBuf, message: String },
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub host: String,
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database_path: Option<PathBuf>,
    pub max_iterations: usize,
    pub task_timeout: Duration,
    pub batch_task_timeout: Duration,
    pub tool_timeout: Duration,
    pub completed_task_history: usize,
    pub skills_dir: Option<PathBuf>,
    pub knowledge_dir: Option<PathBuf>,
    pub roles: RoleSet,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENAI_API_KEY` is not set,
    /// `ConfigError::InvalidValue` for unparsable numbers and
    /// `ConfigError::RolesFile` if `ROLES_PATH` cannot be read.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let base_url = lookup("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let model = lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 8080u16)?;

        let database_path = match lookup("DATABASE_PATH") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from("data/cyberstrike.db")),
        };

        let max_iterations = parse_or(&lookup, "MAX_ITERATIONS", 10usize)?;
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let roles = match lookup("ROLES_PATH").filter(|v| !v.trim().is_empty()) {
            Some(path) => RoleSet::load(Path::new(&path))?,
            None => RoleSet::default(),
        };

        Ok(Self {
            api_key,
            base_url,
            model,
            host,
            port,
            database_path,
            max_iterations,
            task_timeout: Duration::from_secs(parse_or(&lookup, "TASK_TIMEOUT_SECS", 36_000u64)?),
            batch_task_timeout: Duration::from_secs(parse_or(&lookup, "BATCH_TASK_TIMEOUT_SECS", 1_800u64)?),
            tool_timeout: Duration::from_secs(parse_or(&lookup, "TOOL_TIMEOUT_SECS", 600u64)?),
            completed_task_history: parse_or(&lookup, "COMPLETED_TASK_HISTORY", 50usize)?,
            skills_dir: lookup("SKILLS_DIR").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
            knowledge_dir: lookup("KNOWLEDGE_DIR").filter(|v| !v.trim().is_empty()).map(PathBuf::from),
            roles,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

/// A named tool/skill policy applied to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    /// Prepended to the user message, separated by a blank line.
    #[serde(default)]
    pub user_prompt: String,
    /// Tool allow-list; empty means every tool.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Skills recommended to the model in the system prompt.
    #[serde(default)]
    pub skills: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RolesFile {
    #[serde(default)]
    roles: HashMap<String, RoleConfig>,
}

/// The configured roles.
#[derive(Debug, Clone, Default)]
pub struct RoleSet {
    roles: HashMap<String, RoleConfig>,
}

/// Result of looking up a role name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRole {
    pub user_prompt: Option<String>,
    pub policy: RunPolicy,
}

impl ResolvedRole {
    /// The message actually sent to the model.
    pub fn apply(&self, message: &str) -> String {
        match &self.user_prompt {
            Some(prompt) => format!("{}\n\n{}", prompt, message),
            None => message.to_string(),
        }
    }
}

impl RoleSet {
    pub fn new(roles: HashMap<String, RoleConfig>) -> Self {
        Self { roles }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::RolesFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&raw).map_err(|message| ConfigError::RolesFile {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        let file: RolesFile = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        Ok(Self::new(file.roles))
    }

    pub fn get(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.get(name)
    }

    /// Enabled role names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .roles
            .iter()
            .filter(|(_, r)| r.enabled)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Empty, `default`, unknown and disabled roles all resolve to the
    /// default policy.
    pub fn resolve(&self, name: &str) -> ResolvedRole {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("default") {
            return ResolvedRole::default();
        }
        let Some(role) = self.roles.get(name).filter(|r| r.enabled) else {
            tracing::debug!(role = %name, "Unknown or disabled role, using default policy");
            return ResolvedRole::default();
        };
        ResolvedRole {
            user_prompt: Some(role.user_prompt.trim().to_string()).filter(|p| !p.is_empty()),
            policy: RunPolicy {
                allowed_tools: role.tools.clone(),
                skill_hints: role.skills.clone(),
            },
        }
    }
}
