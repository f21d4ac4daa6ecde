//! Ingester configuration.
//!
//! Loaded from one YAML file. `${VAR}` and `${VAR:-default}` references are
//! substituted from the environment before parsing, and every section has
//! defaults so a minimal file works.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ingestion::ComposerSettings;
use publisher::{MqttConfig, PublisherSettings};
use serde::Deserialize;
use storage::FeatureStoreConfig;
use wis2_common::topic::DEFAULT_TOPIC_PREFIX;
use wis2_common::DataFormat;

/// Top-level ingester configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    pub intake: IntakeConfig,
    pub mappings: MappingsConfig,
    pub registry: RegistryConfig,
    pub outbox: OutboxConfig,
    pub publisher: PublisherConfig,
    pub features: FeaturesConfig,
    pub topics: TopicsConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Directory watched for incoming files (recursively)
    pub watch_dir: PathBuf,
    /// Where dead-lettered raw files are moved
    pub failed_dir: PathBuf,
    pub poll_interval_ms: u64,
    /// Formats accepted; files of other formats are dead-lettered
    pub formats: Vec<DataFormat>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("./data/incoming"),
            failed_dir: PathBuf::from("./data/failed"),
            poll_interval_ms: 1000,
            formats: vec![DataFormat::Csv, DataFormat::Bufr],
        }
    }
}

impl IntakeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MappingsConfig {
    /// CSV column mappings; without it every CSV uses the built-in layout
    pub csv: Option<PathBuf>,
    /// Extra BUFR element and sequence definitions
    pub bufr_tables: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Station list CSV
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./config/stations.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// SQLite database holding the outbox and dead letters
    pub path: PathBuf,
    /// Outbox depth at which intake admission is suspended
    pub high_watermark: u64,
    /// Depth below which admission resumes
    pub low_watermark: u64,
    /// ACKED entries older than this are purged
    pub retention_hours: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/wis2-node.db"),
            high_watermark: 10_000,
            low_watermark: 8_000,
            retention_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub broker: MqttConfig,
    pub delivery: PublisherSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub store: FeatureStoreConfig,
    /// Base URL under which the store is served publicly
    pub public_base_url: String,
    /// Objects below this size are embedded in notifications
    pub inline_limit: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        let composer = ComposerSettings::default();
        Self {
            store: FeatureStoreConfig::default(),
            public_base_url: composer.public_base_url,
            inline_limit: composer.inline_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub prefix: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Intake events processed concurrently
    pub workers: usize,
    /// Binding attempts for an unknown station before dead-lettering
    pub bind_attempts: u32,
    pub bind_retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            bind_attempts: 3,
            bind_retry_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl IngesterConfig {
    /// Load a configuration file with environment substitution.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = shellexpand::env(content).context("Environment substitution failed")?;
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.outbox.low_watermark == 0 {
            bail!("outbox.low_watermark must be at least 1");
        }
        if self.outbox.low_watermark >= self.outbox.high_watermark {
            bail!(
                "outbox.low_watermark ({}) must be below outbox.high_watermark ({})",
                self.outbox.low_watermark,
                self.outbox.high_watermark
            );
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        if self.intake.formats.is_empty() {
            bail!("intake.formats must name at least one format");
        }
        Ok(())
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            topic_prefix: self.topics.prefix.clone(),
            public_base_url: self.features.public_base_url.clone(),
            inline_limit: self.features.inline_limit,
        }
    }
}
