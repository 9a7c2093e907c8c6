//! Layered configuration: built-in defaults, an optional TOML file, then CLI
//! flags. The API key is read once from the environment and is never stored
//! in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Args;
use crate::error::LabError;

pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_SURVEY_URL: &str = "https://www.wjx.cn/vm/QHyr8WO.aspx";
pub const DEFAULT_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub port: u16,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    /// Number of most recent transcript entries sent with each request.
    pub context_window: usize,
    pub timeout_secs: u64,
    pub survey_url: String,
    /// Directory for `research_notes.txt` and `dialogue_record.txt`.
    pub output_dir: PathBuf,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: String,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            port: 8501,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            context_window: 5,
            timeout_secs: 60,
            survey_url: DEFAULT_SURVEY_URL.to_string(),
            output_dir: PathBuf::from("."),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

impl LabConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, LabError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, LabError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LabError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Build the effective configuration for a command line.
    pub fn resolve(args: &Args) -> Result<Self, LabError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Overlay any flags the user passed explicitly.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(endpoint) = &args.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if let Some(temperature) = args.temperature {
            self.temperature = temperature;
        }
        if let Some(window) = args.context_window {
            self.context_window = window;
        }
        if let Some(timeout) = args.timeout_secs {
            self.timeout_secs = timeout;
        }
        if let Some(url) = &args.survey_url {
            self.survey_url = url.clone();
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
    }

    pub fn validate(&self) -> Result<(), LabError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LabError::config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.context_window == 0 {
            return Err(LabError::config("context_window must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(LabError::config("timeout_secs must be at least 1"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(LabError::config("endpoint must not be empty"));
        }
        if self.survey_url.trim().is_empty() {
            return Err(LabError::config("survey_url must not be empty"));
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_are_valid() {
        let config = LabConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context_window, 5);
        assert_eq!(config.model, "deepseek-chat");
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LabConfig::from_toml_str("model = \"other-model\"\nport = 9000\n").unwrap();
        assert_eq!(config.model, "other-model");
        assert_eq!(config.port, 9000);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.context_window, 5);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = LabConfig::from_toml_str("port = \"not a number\"").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = LabConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "model = \"from-file\"\ntemperature = 1.0\n").unwrap();
        let args = Args::parse_from([
            "persona-lab",
            "--config",
            path.to_str().unwrap(),
            "--temperature",
            "0.2",
        ]);
        let config = LabConfig::resolve(&args).unwrap();
        assert_eq!(config.model, "from-file");
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let config = LabConfig { temperature: 3.5, ..LabConfig::default() };
        assert_eq!(config.validate().unwrap_err().kind(), "config");
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = LabConfig { context_window: 0, ..LabConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = LabConfig { timeout_secs: 0, ..LabConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_survey_url() {
        let config = LabConfig { survey_url: "  ".to_string(), ..LabConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_missing_variable() {
        let config = LabConfig {
            api_key_env: "PERSONA_LAB_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LabConfig::default()
        };
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_api_key_from_dotenv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "PERSONA_LAB_DOTENV_TEST_KEY=sk-from-dotenv\n").unwrap();
        dotenvy::from_path(&path).unwrap();

        let config = LabConfig {
            api_key_env: "PERSONA_LAB_DOTENV_TEST_KEY".to_string(),
            ..LabConfig::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-from-dotenv"));
    }
}
