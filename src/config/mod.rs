mod file_config;

pub use file_config::{
    AuditLogConfig, FileConfig, GatewayConfig, ProviderConfig, ScannerConfig, ThresholdsConfig,
};

use crate::gateway::RetryPolicy;
use crate::moderation::Thresholds;
use crate::pipeline::WorkKind;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const DEFAULT_WORKER_COUNT: usize = 2;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub provider_url: Option<String>,
    pub provider_model: Option<String>,
    pub embedding_model: Option<String>,
    pub provider_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub gateway: GatewaySettings,
    pub provider: ProviderSettings,
    pub thresholds: Thresholds,
    /// One entry per work kind, in `WorkKind::ALL` order.
    pub scanners: Vec<ScannerSettings>,
    pub audit_log_retention_days: u64,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub retry: RetryPolicy,
    /// Bound on one whole gateway call, retries included.
    pub timeout: Duration,
    pub max_concurrent_calls: usize,
    /// Bound on a single HTTP request to the provider.
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(90),
            max_concurrent_calls: 4,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    pub kind: WorkKind,
    pub interval: Duration,
    pub worker_count: usize,
    pub enabled: bool,
}

impl ScannerSettings {
    pub fn defaults_for(kind: WorkKind) -> Self {
        let hours = match kind {
            WorkKind::ModeratePost => 24,
            WorkKind::ModerateComment => 2,
            WorkKind::TagContent => 1,
            WorkKind::EmbedContent => 1,
            WorkKind::EmbedSkill => 6,
            WorkKind::RefreshUserInterests => 1,
        };
        Self {
            kind,
            interval: Duration::from_secs(hours * 60 * 60),
            worker_count: DEFAULT_WORKER_COUNT,
            enabled: true,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let gateway = resolve_gateway(file.gateway.unwrap_or_default())?;

        let provider_file = file.provider.unwrap_or_default();
        let provider = ProviderSettings {
            base_url: provider_file
                .base_url
                .or_else(|| cli.provider_url.clone())
                .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string()),
            model: provider_file
                .model
                .or_else(|| cli.provider_model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embedding_model: provider_file
                .embedding_model
                .or_else(|| cli.embedding_model.clone())
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_key: provider_file
                .api_key
                .or_else(|| cli.provider_api_key.clone()),
        };

        let thresholds = resolve_thresholds(file.thresholds.unwrap_or_default());
        if let Err(e) = thresholds.validate() {
            bail!("Invalid thresholds: {}", e);
        }

        for key in file.scanners.keys() {
            if WorkKind::parse(key).is_none() {
                bail!("Unknown scanner kind in [scanners]: {}", key);
            }
        }
        let mut scanners = Vec::with_capacity(WorkKind::ALL.len());
        for kind in WorkKind::ALL {
            let mut settings = ScannerSettings::defaults_for(kind);
            if let Some(overrides) = file.scanners.get(kind.as_str()) {
                if let Some(secs) = overrides.interval_secs {
                    if secs < 1 {
                        bail!("scanners.{}.interval_secs must be >= 1", kind);
                    }
                    settings.interval = Duration::from_secs(secs);
                }
                if let Some(count) = overrides.worker_count {
                    if count < 1 {
                        bail!("scanners.{}.worker_count must be >= 1", kind);
                    }
                    settings.worker_count = count;
                }
                if let Some(enabled) = overrides.enabled {
                    settings.enabled = enabled;
                }
            }
            scanners.push(settings);
        }

        let audit_log_retention_days = file
            .audit_log
            .and_then(|a| a.retention_days)
            .unwrap_or(30);

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            gateway,
            provider,
            thresholds,
            scanners,
            audit_log_retention_days,
        })
    }

    pub fn content_db_path(&self) -> PathBuf {
        self.db_dir.join("content.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }

    pub fn scanner(&self, kind: WorkKind) -> Option<&ScannerSettings> {
        self.scanners.iter().find(|s| s.kind == kind)
    }
}

fn resolve_gateway(file: GatewayConfig) -> Result<GatewaySettings> {
    let defaults = GatewaySettings::default();

    let max_attempts = file.max_attempts.unwrap_or(defaults.retry.max_attempts);
    if max_attempts < 1 {
        bail!("gateway.max_attempts must be >= 1");
    }
    let max_concurrent_calls = file
        .max_concurrent_calls
        .unwrap_or(defaults.max_concurrent_calls);
    if max_concurrent_calls < 1 {
        bail!("gateway.max_concurrent_calls must be >= 1");
    }
    let jitter_ratio = file.jitter_ratio.unwrap_or(defaults.retry.jitter_ratio);
    if !(0.0..1.0).contains(&jitter_ratio) {
        bail!("gateway.jitter_ratio must be in [0, 1)");
    }

    Ok(GatewaySettings {
        retry: RetryPolicy {
            max_attempts,
            base_delay: file
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            jitter_ratio,
            retry_transient: file
                .retry_transient
                .unwrap_or(defaults.retry.retry_transient),
        },
        timeout: file
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        max_concurrent_calls,
        request_timeout: file
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout),
    })
}

fn resolve_thresholds(file: ThresholdsConfig) -> Thresholds {
    let d = Thresholds::default();
    Thresholds {
        toxicity: file.toxicity.unwrap_or(d.toxicity),
        severe_toxicity: file.severe_toxicity.unwrap_or(d.severe_toxicity),
        obscene: file.obscene.unwrap_or(d.obscene),
        threat: file.threat.unwrap_or(d.threat),
        insult: file.insult.unwrap_or(d.insult),
        identity_attack: file.identity_attack.unwrap_or(d.identity_attack),
        sexual_explicit: file.sexual_explicit.unwrap_or(d.sexual_explicit),
    }
}

/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("HEADERS"),
            Some(RequestsLoggingLevel::Headers)
        ));
        assert!(parse_logging_level("body").is_none());
    }

    #[test]
    fn test_resolve_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();

        assert_eq!(config.gateway.retry.max_attempts, 5);
        assert_eq!(config.gateway.retry.base_delay, Duration::from_secs(2));
        assert!(!config.gateway.retry.retry_transient);
        assert_eq!(config.gateway.timeout, Duration::from_secs(90));
        assert_eq!(config.gateway.max_concurrent_calls, 4);
        assert_eq!(config.provider.base_url, DEFAULT_PROVIDER_URL);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.audit_log_retention_days, 30);

        assert_eq!(config.scanners.len(), 6);
        let post = config.scanner(WorkKind::ModeratePost).unwrap();
        assert_eq!(post.interval, Duration::from_secs(24 * 3600));
        assert_eq!(post.worker_count, 2);
        let skill = config.scanner(WorkKind::EmbedSkill).unwrap();
        assert_eq!(skill.interval, Duration::from_secs(6 * 3600));
        assert_eq!(
            config.scanner(WorkKind::ModerateComment).unwrap().interval,
            Duration::from_secs(2 * 3600)
        );
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            port: 3001,
            metrics_port: 9091,
            provider_url: Some("http://cli:8080/v1".to_string()),
            provider_model: Some("cli-model".to_string()),
            ..Default::default()
        };

        let mut scanners = HashMap::new();
        scanners.insert(
            "tag-content".to_string(),
            ScannerConfig {
                interval_secs: Some(120),
                worker_count: Some(8),
                enabled: Some(false),
            },
        );
        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            provider: Some(ProviderConfig {
                base_url: Some("http://toml:8080/v1".to_string()),
                ..Default::default()
            }),
            thresholds: Some(ThresholdsConfig {
                toxicity: Some(0.9),
                ..Default::default()
            }),
            scanners,
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.provider.base_url, "http://toml:8080/v1");
        assert_eq!(config.provider.model, "cli-model");
        assert_eq!(config.thresholds.toxicity, 0.9);
        assert_eq!(config.thresholds.threat, 0.6);

        let tag = config.scanner(WorkKind::TagContent).unwrap();
        assert_eq!(tag.interval, Duration::from_secs(120));
        assert_eq!(tag.worker_count, 8);
        assert!(!tag.enabled);
        assert!(config.scanner(WorkKind::EmbedContent).unwrap().enabled);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let temp_dir = TempDir::new().unwrap();
        for bad in [0.0, 1.0, 1.5] {
            let file = FileConfig {
                thresholds: Some(ThresholdsConfig {
                    insult: Some(bad),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();
            assert!(err.to_string().contains("Invalid thresholds"), "{}", err);
        }
    }

    #[test]
    fn test_zero_counts_rejected() {
        let temp_dir = TempDir::new().unwrap();

        let file = FileConfig {
            gateway: Some(GatewayConfig {
                max_attempts: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());

        let file = FileConfig {
            gateway: Some(GatewayConfig {
                max_concurrent_calls: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());

        let mut scanners = HashMap::new();
        scanners.insert(
            "embed-skill".to_string(),
            ScannerConfig {
                worker_count: Some(0),
                ..Default::default()
            },
        );
        let file = FileConfig {
            scanners,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli_for(&temp_dir), Some(file)).is_err());
    }

    #[test]
    fn test_unknown_scanner_kind_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut scanners = HashMap::new();
        scanners.insert("moderate-video".to_string(), ScannerConfig::default());
        let file = FileConfig {
            scanners,
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_for(&temp_dir), Some(file)).unwrap_err();
        assert!(err.to_string().contains("moderate-video"));
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli_for(&temp_dir), None).unwrap();
        assert_eq!(config.content_db_path(), temp_dir.path().join("content.db"));
        assert_eq!(config.server_db_path(), temp_dir.path().join("server.db"));
    }
}
