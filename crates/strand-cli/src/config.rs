//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use strand_history::persist::DEFAULT_DEBOUNCE;
use strand_history::{AgentIdentity, OperationContext, PersistQueueOptions, SanitizeOptions};

/// Configuration for strand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debounce window for persistence, in milliseconds
    pub debounce_ms: Option<u64>,
    /// Directory holding stored conversations
    pub data_dir: Option<String>,
    /// User the conversations belong to
    pub user_id: Option<String>,
    /// Drop unfinished tool calls from the model view
    pub filter_incomplete_tool_calls: Option<bool>,
    /// Identity recorded on persisted messages when running as a sub-agent
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub parent_agent_id: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strand")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STRAND_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse config from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            debounce_ms: Some(DEFAULT_DEBOUNCE.as_millis() as u64),
            user_id: Some("local".to_string()),
            filter_incomplete_tool_calls: Some(true),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Directory holding stored conversations
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("strand")
                .join("conversations"),
        }
    }

    pub fn user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| "local".to_string())
    }

    pub fn persist_options(&self) -> PersistQueueOptions {
        PersistQueueOptions {
            debounce: self
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DEBOUNCE),
        }
    }

    pub fn sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions {
            filter_incomplete_tool_calls: self.filter_incomplete_tool_calls.unwrap_or(true),
        }
    }

    /// Build the execution context for a conversation
    pub fn operation_context(&self, user_id: &str, conversation_id: &str) -> OperationContext {
        let mut context = OperationContext::new(user_id, conversation_id);
        if let (Some(id), Some(name)) = (&self.agent_id, &self.agent_name) {
            context = context.with_agent_identity(AgentIdentity::new(id, name));
        }
        if let Some(parent) = &self.parent_agent_id {
            context = context.with_parent_agent(parent);
        }
        context
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# strand configuration file
# Place at ~/.config/strand/config.toml (Linux/Mac) or %APPDATA%\strand\config.toml (Windows)
# Override the location with STRAND_CONFIG_PATH

# Quiet period before buffered messages are written, in milliseconds
debounce_ms = 200

# Where conversations are stored (default: <local data dir>/strand/conversations)
# data_dir = "/var/lib/strand"

# Owner of the conversations
user_id = "local"

# Drop tool calls that never finished from the model view
filter_incomplete_tool_calls = true

# Sub-agent attribution (applied only when parent_agent_id is set)
# agent_id = "researcher-1"
# agent_name = "Researcher"
# parent_agent_id = "supervisor"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.debounce_ms, Some(200));
        assert_eq!(config.user_id(), "local");
        assert!(config.sanitize_options().filter_incomplete_tool_calls);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.persist_options(), PersistQueueOptions::default());
        assert_eq!(config.user_id(), "local");
        assert!(config.data_dir().ends_with("strand/conversations"));
    }

    #[test]
    fn test_operation_context_attribution() {
        let config = Config::parse(
            r#"
            agent_id = "researcher-1"
            agent_name = "Researcher"
            parent_agent_id = "supervisor"
            "#,
        )
        .unwrap();
        let context = config.operation_context("u1", "c1");
        assert_eq!(context.queue_key().as_deref(), Some("u1:c1"));
        assert_eq!(context.parent_agent_id.as_deref(), Some("supervisor"));
        assert_eq!(context.agent_identity(), Some(AgentIdentity::new("researcher-1", "Researcher")));
    }

    #[test]
    fn test_partial_identity_is_ignored() {
        let config = Config::parse(r#"agent_id = "researcher-1""#).unwrap();
        assert!(config.operation_context("u1", "c1").agent_identity().is_none());
    }
}
