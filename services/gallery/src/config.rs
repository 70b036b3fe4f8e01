use crate::model::MAX_RETRY_ATTEMPT;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Kafka configuration
    pub kafka: KafkaConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Retry policy for failed processing events
    #[serde(default)]
    pub retry: RetryConfig,
    /// Watermark rendering configuration
    #[serde(default)]
    pub watermark: WatermarkConfig,
    /// Health endpoint configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka configuration for processing events and notifications
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying processing events (initial and re-dispatched)
    #[serde(default = "default_processing_topic")]
    pub processing_topic: String,
    /// Topic fanned out to notification subscribers
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding uploads awaiting processing
    pub staging_bucket: String,
    /// Bucket holding processed, user-visible photos
    pub primary_bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for active photos in the primary bucket
    #[serde(default = "default_active_prefix")]
    pub active_prefix: String,
    /// Key prefix for recycled photos in the primary bucket
    #[serde(default = "default_recycle_prefix")]
    pub recycle_prefix: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Bounded retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Highest attempt number; a failure at this attempt is terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,
    /// Attempt whose failure sends the single user notification
    #[serde(default = "default_notify_on_attempt")]
    pub notify_on_attempt: u8,
}

/// Watermark rendering
#[derive(Debug, Clone, Deserialize)]
pub struct WatermarkConfig {
    /// Font size is image width divided by this
    #[serde(default = "default_font_divisor")]
    pub font_divisor: u32,
    /// Gap between the label and the right edge, in pixels
    #[serde(default = "default_margin_px")]
    pub margin_px: u32,
    /// Opacity of the white label, 0.0 - 1.0
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

/// Health endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address
    #[serde(default = "default_health_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_health_port")]
    pub port: u16,
    /// Reported status before anyone toggles it
    #[serde(default = "default_true")]
    pub initially_healthy: bool,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "gallery-service".to_string()
}

fn default_processing_topic() -> String {
    "gallery.processing.events".to_string()
}

fn default_notification_topic() -> String {
    "gallery.notifications".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_active_prefix() -> String {
    "active".to_string()
}

fn default_recycle_prefix() -> String {
    "recycle".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u8 {
    MAX_RETRY_ATTEMPT
}

fn default_notify_on_attempt() -> u8 {
    1
}

fn default_font_divisor() -> u32 {
    20
}

fn default_margin_px() -> u32 {
    10
}

fn default_opacity() -> f32 {
    0.5
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/gallery/gallery").required(false))
            // GALLERY__S3__PRIMARY_BUCKET -> s3.primary_bucket
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts > MAX_RETRY_ATTEMPT {
            anyhow::bail!(
                "retry.max_attempts ({}) exceeds the wire limit of {}",
                self.retry.max_attempts,
                MAX_RETRY_ATTEMPT
            );
        }
        if self.retry.notify_on_attempt > self.retry.max_attempts {
            anyhow::bail!(
                "retry.notify_on_attempt ({}) exceeds retry.max_attempts ({})",
                self.retry.notify_on_attempt,
                self.retry.max_attempts
            );
        }
        if self.watermark.font_divisor == 0 {
            anyhow::bail!("watermark.font_divisor must be positive");
        }
        if !(0.0..=1.0).contains(&self.watermark.opacity) {
            anyhow::bail!("watermark.opacity must be within 0.0 - 1.0");
        }
        if self.s3.active_prefix == self.s3.recycle_prefix {
            anyhow::bail!("s3.active_prefix and s3.recycle_prefix must differ");
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl KafkaConfig {
    /// Producer delivery timeout as Duration
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            notify_on_attempt: default_notify_on_attempt(),
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            font_divisor: default_font_divisor(),
            margin_px: default_margin_px(),
            opacity: default_opacity(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
            initially_healthy: true,
        }
    }
}
