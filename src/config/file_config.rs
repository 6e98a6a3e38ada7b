use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Pipeline sections
    pub gateway: Option<GatewayConfig>,
    pub provider: Option<ProviderConfig>,
    pub thresholds: Option<ThresholdsConfig>,
    /// Keyed by work kind, e.g. `[scanners.moderate-post]`.
    pub scanners: HashMap<String, ScannerConfig>,
    pub audit_log: Option<AuditLogConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub jitter_ratio: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub max_concurrent_calls: Option<usize>,
    pub retry_transient: Option<bool>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub toxicity: Option<f64>,
    pub severe_toxicity: Option<f64>,
    pub obscene: Option<f64>,
    pub threat: Option<f64>,
    pub insult: Option<f64>,
    pub identity_attack: Option<f64>,
    pub sexual_explicit: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval_secs: Option<u64>,
    pub worker_count: Option<usize>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuditLogConfig {
    pub retention_days: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
