use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::automation::wait::WaitStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// URL of the O.S. management screen the browser opens first.
    pub page_url: String,
    pub driver_port: u16,
    /// Where to find the chromedriver binary when the tool manages it.
    pub chromedriver_path: Option<PathBuf>,
    /// When false, a chromedriver must already be listening on driver_port.
    pub manage_chromedriver: bool,
    pub headless: bool,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub wait_strategy: WaitStrategy,
    /// Soft limit on open submission windows before a cleanup pass.
    pub max_open_windows: usize,
    /// The form-field editor opens heavier modals, so its limit is lower.
    pub form_max_open_windows: usize,
    pub id_column: char,
    pub classification_column: char,
    pub question_column: char,
    pub ordinal_column: char,
    pub edit_column: char,
    pub validation_column: char,
    /// Spreadsheet shorthand → real classification name.
    pub classification_aliases: HashMap<String, String>,
    /// Classifications the page accepts; anything else is skipped.
    pub allowed_classifications: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page_url: String::new(),
            driver_port: 9516,
            chromedriver_path: None,
            manage_chromedriver: true,
            headless: false,
            wait_timeout_ms: 10_000,
            poll_interval_ms: 500,
            wait_strategy: WaitStrategy::default(),
            max_open_windows: 5,
            form_max_open_windows: 3,
            id_column: 'A',
            classification_column: 'B',
            question_column: 'C',
            ordinal_column: 'D',
            edit_column: 'E',
            validation_column: 'F',
            classification_aliases: HashMap::from([
                ("sla".to_string(), "Corretiva".to_string()),
                ("planejada".to_string(), "Corretiva Planejada".to_string()),
            ]),
            allowed_classifications: vec![
                "Corretiva".to_string(),
                "Corretiva Planejada".to_string(),
                "Atendimento".to_string(),
                "Melhoria".to_string(),
                "Acompanhamento".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Loads the configuration, from `path` when given, otherwise from the
    /// per-user config directory. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "osautomator", "os-automator")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(proj_dirs.config_dir().join("config.json"))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.page_url.is_empty() {
            errors.push("page_url is required (or pass --page-url)".to_string());
        }
        if self.wait_timeout_ms == 0 {
            errors.push("wait_timeout_ms must be greater than zero".to_string());
        }
        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be greater than zero".to_string());
        }
        if self.max_open_windows == 0 || self.form_max_open_windows == 0 {
            errors.push("window limits must be greater than zero".to_string());
        }
        if self.allowed_classifications.is_empty() {
            errors.push("allowed_classifications must not be empty".to_string());
        }
        for column in [
            self.id_column,
            self.classification_column,
            self.question_column,
            self.ordinal_column,
            self.edit_column,
            self.validation_column,
        ] {
            if !column.is_ascii_alphabetic() {
                errors.push(format!("'{column}' is not a valid spreadsheet column letter"));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_run_parameters() {
        let config = AppConfig::default();
        assert_eq!(config.driver_port, 9516);
        assert_eq!(config.wait_timeout_ms, 10_000);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.wait_strategy, WaitStrategy::Polling);
        assert_eq!(config.max_open_windows, 5);
        assert_eq!(config.form_max_open_windows, 3);
        assert_eq!(
            config.classification_aliases.get("sla").map(String::as_str),
            Some("Corretiva")
        );
        assert_eq!(config.allowed_classifications.len(), 5);
    }

    #[test]
    fn validation_catches_the_usual_misconfigurations() {
        let config = AppConfig {
            page_url: String::new(),
            wait_timeout_ms: 0,
            id_column: '1',
            ..AppConfig::default()
        };
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("page_url")));
        assert!(errors.iter().any(|e| e.contains("wait_timeout_ms")));
        assert!(errors.iter().any(|e| e.contains("'1'")));
    }

    #[test]
    fn a_valid_config_produces_no_errors() {
        let config = AppConfig {
            page_url: "https://example.com/os".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "page_url": "https://example.com/os", "headless": true }"#)
                .unwrap();
        assert!(parsed.headless);
        assert_eq!(parsed.driver_port, 9516);
        assert_eq!(parsed.wait_strategy, WaitStrategy::Polling);
    }
}
