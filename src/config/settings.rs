use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::package::narrative::{Language, NarrativeStyle};
use crate::package::ProjectGrouping;
use crate::render::OutputFormat;

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub output: OutputSettings,
    pub package: PackageDefaults,
    pub narrative: NarrativeSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Relative paths are taken from the config directory.
    pub dir: String,
    pub format: OutputFormat,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
            format: OutputFormat::Typst,
        }
    }
}

/// Defaults for package options; command-line flags override them.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageDefaults {
    pub norm_hours: Option<Decimal>,
    pub autopick_contract: bool,
    pub include_timesheets: bool,
    pub include_by_projects: ProjectGrouping,
}

impl Default for PackageDefaults {
    fn default() -> Self {
        Self {
            norm_hours: None,
            autopick_contract: true,
            include_timesheets: false,
            include_by_projects: ProjectGrouping::Auto,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NarrativeSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub language: Language,
    pub style: NarrativeStyle,
}

impl Default for NarrativeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 20,
            language: Language::Ru,
            style: NarrativeStyle::Neutral,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
