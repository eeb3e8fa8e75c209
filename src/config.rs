use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub driver: Option<String>,
    /// Falls back to the driver's preferred size.
    pub block_length: Option<usize>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub run_seconds: u64,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            driver: None,
            block_length: None,
            inputs: vec![0, 1],
            outputs: vec![0, 1],
            run_seconds: 2,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("reading {}: {e}", path.display()))?;
        Self::parse(&text).map_err(|e| format!("parsing {}: {e}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
