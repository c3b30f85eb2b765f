use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

/// Engine configuration. Owned by the setup wizard in the full product;
/// here it is read from `Config.toml` next to the binary and/or the
/// workspace-scoped `.coworker/config.toml`, with defaults when neither
/// exists.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Allowed category labels. Results outside this set are normalized
    /// to "unknown" before routing.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Categories that cannot be archived without a monetary amount.
    #[serde(default = "default_amount_required")]
    pub amount_required_categories: Vec<String>,

    /// Results below this confidence are always routed to review.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Upper bound on simultaneous classifier calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// File extensions (lowercase, no dot) picked up from the inbox.
    #[serde(default = "default_extensions")]
    pub include_extensions: Vec<String>,

    /// Glob patterns excluded from the inbox scan.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            categories: default_categories(),
            amount_required_categories: default_amount_required(),
            confidence_threshold: default_confidence_threshold(),
            concurrency: default_concurrency(),
            include_extensions: default_extensions(),
            ignore_patterns: Vec::new(),
        }
    }
}

fn default_categories() -> Vec<String> {
    ["Receipt", "Invoice", "Statement", "Contract", "Other"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_amount_required() -> Vec<String> {
    ["Receipt", "Invoice", "Statement"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_confidence_threshold() -> f32 {
    0.70
}

fn default_concurrency() -> usize {
    4
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn load_configuration(workspace_config: &Path) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(ConfigFile::from(workspace_config).required(false))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn requires_amount(&self, category: &str) -> bool {
        self.amount_required_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.confidence_threshold, 0.70);
        assert!(config.requires_amount("Receipt"));
        assert!(config.requires_amount("receipt"));
        assert!(!config.requires_amount("Contract"));
    }

    #[test]
    fn test_load_without_files_yields_defaults() {
        let config = load_configuration(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.categories.len(), 5);
    }
}
