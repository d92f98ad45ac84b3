use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::AgentError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl std::str::FromStr for DatabaseBackend {
    type Err = AgentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(AgentError::Configuration(format!(
                "unknown database backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Database file for the sqlite backend; `:memory:` keeps it in RAM.
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            name: "evolyn".to_string(),
            user: "postgres".to_string(),
            password: "root".to_string(),
            sqlite_path: "evolyn.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5050,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Notes returned by `get_notes` when the model does not ask for a limit.
    pub notes_limit: u32,
    /// Author recorded on saved notes when no user id is known.
    pub note_author: String,
    /// Upper bound on model round-trips that request tools within one turn.
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            notes_limit: 10,
            note_author: "conversational_agent".to_string(),
            max_tool_rounds: 3,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            log::info!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(backend) = lookup("DATABASE_BACKEND") {
            self.database.backend = backend.parse()?;
        }
        if let Some(host) = lookup("DATABASE_HOST") {
            self.database.host = host;
        }
        if let Some(port) = lookup("DATABASE_PORT") {
            self.database.port = port
                .parse()
                .with_context(|| format!("DATABASE_PORT is not a valid port: {}", port))?;
        }
        if let Some(name) = lookup("DATABASE_NAME") {
            self.database.name = name;
        }
        if let Some(user) = lookup("DATABASE_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("DATABASE_PASS") {
            self.database.password = password;
        }
        if let Some(path) = lookup("SQLITE_PATH") {
            self.database.sqlite_path = path;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("SERVER_PORT is not a valid port: {}", port))?;
        }
        Ok(())
    }

    /// Check that everything the agent needs to talk to the model is present.
    pub fn validate_for_agent(&self) -> crate::error::Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(AgentError::Configuration(
                "OPENAI_API_KEY is not set. Add it to your .env file or config.toml.".to_string(),
            ));
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(AgentError::Configuration(
                "agent.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
