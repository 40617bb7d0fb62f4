//! Configuration, built once at startup and passed down explicitly
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, then the environment. The environment is only read here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::ServerDescriptor;

/// Credential required by the OpenAI oracle
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
const MODEL_VAR: &str = "CONCLAVE_MODEL";
const BASE_URL_VAR: &str = "CONCLAVE_BASE_URL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// OpenAI chat completions with function tools
    #[default]
    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,
    /// Offline keyword heuristics
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub kind: OracleKind,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    /// Taken from the environment only
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            model: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_ms: 120_000,
            api_key: None,
        }
    }
}

impl OracleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Tool calls allowed per request before the loop is cut off
    pub max_iterations: usize,
    pub call_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub shutdown_drain_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            call_timeout_ms: 60_000,
            discovery_timeout_ms: 10_000,
            shutdown_drain_ms: 3_000,
        }
    }
}

impl AgentSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker servers to launch; empty means the built-in math and text workers
    pub servers: Vec<ServerDescriptor>,
    pub agent: AgentSettings,
    pub oracle: OracleSettings,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

impl Config {
    /// Load from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Some((path.to_path_buf(), text))
            }
            None => None,
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build from file contents and an environment lookup
    pub fn from_sources<F>(file: Option<(PathBuf, String)>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some((path, text)) => {
                toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };

        config.oracle.api_key = env(API_KEY_VAR).filter(|key| !key.trim().is_empty());
        if let Some(model) = env(MODEL_VAR) {
            config.oracle.model = model;
        }
        if let Some(url) = env(BASE_URL_VAR) {
            config.oracle.base_url = url;
        }
        Ok(config)
    }

    /// Fill in the built-in workers when no servers are configured
    ///
    /// `forwarded` is appended to each worker's command line so workers run
    /// with the same oracle and config file as the orchestrator.
    pub fn with_default_servers(mut self, executable: &Path, forwarded: &[String]) -> Self {
        if self.servers.is_empty() {
            let command = executable.to_string_lossy().into_owned();
            self.servers = ["math", "text"]
                .into_iter()
                .map(|kind| {
                    let mut args = vec!["worker".to_string(), kind.to_string()];
                    args.extend(forwarded.iter().cloned());
                    ServerDescriptor::stdio(kind, command.clone(), args)
                })
                .collect();
        }
        self
    }

    /// Check what the worker side needs: credentials and loop limits
    pub fn validate_agent(&self) -> Result<(), ConfigError> {
        if self.oracle.kind == OracleKind::OpenAi && self.oracle.api_key.is_none() {
            return Err(ConfigError::MissingCredential(API_KEY_VAR));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid("agent.max_iterations must be at least 1".into()));
        }
        if self.oracle.timeout_ms == 0 {
            return Err(ConfigError::Invalid("oracle.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Full validation for the orchestrator
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_agent()?;

        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("no servers configured".into()));
        }
        for (i, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("server #{} has an empty name", i + 1)));
            }
            if self.servers[..i].iter().any(|s| s.name == server.name) {
                return Err(ConfigError::Invalid(format!("duplicate server name `{}`", server.name)));
            }
        }
        for (name, value) in [
            ("agent.call_timeout_ms", self.agent.call_timeout_ms),
            ("agent.discovery_timeout_ms", self.agent.discovery_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn file(text: &str) -> Option<(PathBuf, String)> {
        Some((PathBuf::from("conclave.toml"), text.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(None, env(&[])).unwrap();
        assert_eq!(config.oracle.kind, OracleKind::OpenAi);
        assert_eq!(config.oracle.model, "gpt-4o");
        assert_eq!(config.agent.max_iterations, 8);
        assert_eq!(config.agent.call_timeout(), Duration::from_secs(60));
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        let config = Config::from_sources(None, env(&[]))
            .unwrap()
            .with_default_servers(Path::new("/bin/conclave"), &[]);

        assert!(matches!(config.validate(), Err(ConfigError::MissingCredential(API_KEY_VAR))));
    }

    #[test]
    fn test_blank_credential_counts_as_missing() {
        let config = Config::from_sources(None, env(&[(API_KEY_VAR, "  ")])).unwrap();
        assert!(config.oracle.api_key.is_none());
    }

    #[test]
    fn test_heuristic_needs_no_credential() {
        let mut config = Config::from_sources(None, env(&[]))
            .unwrap()
            .with_default_servers(Path::new("/bin/conclave"), &[]);
        config.oracle.kind = OracleKind::Heuristic;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_and_env_layering() {
        let text = r#"
            log_filter = "conclave=debug"

            [agent]
            max_iterations = 3
            call_timeout_ms = 500

            [oracle]
            kind = "heuristic"
            model = "from-file"

            [[servers]]
            name = "echo"
            command = "/usr/bin/echo-worker"
            args = ["--fast"]
        "#;
        let config = Config::from_sources(
            file(text),
            env(&[(API_KEY_VAR, "sk-test"), (MODEL_VAR, "from-env")]),
        )
        .unwrap();

        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.agent.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.agent.discovery_timeout_ms, 10_000);
        assert_eq!(config.oracle.kind, OracleKind::Heuristic);
        assert_eq!(config.oracle.model, "from-env");
        assert_eq!(config.oracle.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].command_line(), "/usr/bin/echo-worker --fast");
        assert_eq!(config.log_filter.as_deref(), Some("conclave=debug"));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Config::from_sources(file("[agent]\nmax_iterations = \"many\""), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("conclave.toml"));
    }

    #[test]
    fn test_default_servers_forward_args() {
        let forwarded = vec!["--oracle".to_string(), "heuristic".to_string()];
        let config = Config::default().with_default_servers(Path::new("/opt/conclave"), &forwarded);

        let names: Vec<&str> = config.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["math", "text"]);
        assert_eq!(config.servers[1].command_line(), "/opt/conclave worker text --oracle heuristic");
    }

    #[test]
    fn test_configured_servers_kept() {
        let mut config = Config::default();
        config.servers.push(ServerDescriptor::stdio("custom", "worker", vec![]));

        let config = config.with_default_servers(Path::new("/opt/conclave"), &[]);
        assert_eq!(config.servers.len(), 1);
    }

    #[test]
    fn test_duplicate_server_names_rejected() {
        let mut config = Config::default();
        config.oracle.kind = OracleKind::Heuristic;
        config.servers.push(ServerDescriptor::stdio("dup", "a", vec![]));
        config.servers.push(ServerDescriptor::stdio("dup", "b", vec![]));

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("dup")));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut config = Config::default();
        config.oracle.kind = OracleKind::Heuristic;
        config.agent.max_iterations = 0;

        assert!(matches!(config.validate_agent(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conclave.toml");
        std::fs::write(&path, "[oracle]\nkind = \"heuristic\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.oracle.kind, OracleKind::Heuristic);

        let missing = temp.path().join("absent.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Read { .. })));
    }
}
