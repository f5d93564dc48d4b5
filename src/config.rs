// src/config.rs
//
// Application configuration: defaults, optional YAML file, CLI overrides.
// Flags win over the file only when they were actually given on the command
// line, so every field on `Overrides` is an `Option`.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::constants::{
    DEFAULT_CHECKPOINT_PATH, DEFAULT_CONCURRENCY, DEFAULT_METRICS_ADDR,
    DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF_MS,
    MIN_PART_SIZE,
};

/// Connection settings for one S3-compatible endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub secure: bool,
}

/// Migration-specific settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub bucket: String,
    pub prefix: String,
    pub object: String,
    pub concurrency: usize,
    pub multipart_threshold: i64,
    pub part_size: i64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub dry_run: bool,
    pub checkpoint: String,
    pub skip_existing: bool,
    pub resume: bool,
    pub show_progress: bool,
    pub metrics_addr: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            object: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            retries: DEFAULT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            dry_run: false,
            checkpoint: DEFAULT_CHECKPOINT_PATH.to_string(),
            skip_existing: true,
            resume: false,
            show_progress: true,
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

/// Top-level configuration with the same group layout as the YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: S3Config,
    pub target: S3Config,
    pub migration: MigrationConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: S3Config::default(),
            target: S3Config {
                secure: true,
                ..S3Config::default()
            },
            migration: MigrationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Values given explicitly on the command line. `None` means "not provided";
/// the file value (or the default) stays in effect.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub src_endpoint: Option<String>,
    pub src_access_key: Option<String>,
    pub src_secret_key: Option<String>,
    pub src_secure: Option<bool>,
    pub dst_endpoint: Option<String>,
    pub dst_access_key: Option<String>,
    pub dst_secret_key: Option<String>,
    pub dst_secure: Option<bool>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub object: Option<String>,
    pub concurrency: Option<usize>,
    pub multipart_threshold: Option<i64>,
    pub part_size: Option<i64>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub dry_run: Option<bool>,
    pub checkpoint: Option<String>,
    pub skip_existing: Option<bool>,
    pub resume: Option<bool>,
    pub show_progress: Option<bool>,
    pub log_level: Option<String>,
}

impl Config {
    /// Build the effective configuration: defaults, then the YAML file if
    /// given, then command-line overrides, then validation.
    pub fn load(config_file: Option<&Path>, overrides: Overrides) -> Result<Config> {
        let mut cfg = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        cfg.apply(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn apply(&mut self, ov: Overrides) {
        if let Some(v) = ov.src_endpoint {
            self.source.endpoint = v;
        }
        if let Some(v) = ov.src_access_key {
            self.source.access_key = v;
        }
        if let Some(v) = ov.src_secret_key {
            self.source.secret_key = v;
        }
        if let Some(v) = ov.src_secure {
            self.source.secure = v;
        }
        if let Some(v) = ov.dst_endpoint {
            self.target.endpoint = v;
        }
        if let Some(v) = ov.dst_access_key {
            self.target.access_key = v;
        }
        if let Some(v) = ov.dst_secret_key {
            self.target.secret_key = v;
        }
        if let Some(v) = ov.dst_secure {
            self.target.secure = v;
        }
        if let Some(v) = ov.bucket {
            self.migration.bucket = v;
        }
        if let Some(v) = ov.prefix {
            self.migration.prefix = v;
        }
        if let Some(v) = ov.object {
            self.migration.object = v;
        }
        if let Some(v) = ov.concurrency {
            self.migration.concurrency = v;
        }
        if let Some(v) = ov.multipart_threshold {
            self.migration.multipart_threshold = v;
        }
        if let Some(v) = ov.part_size {
            self.migration.part_size = v;
        }
        if let Some(v) = ov.retries {
            self.migration.retries = v;
        }
        if let Some(v) = ov.retry_backoff_ms {
            self.migration.retry_backoff_ms = v;
        }
        if let Some(v) = ov.dry_run {
            self.migration.dry_run = v;
        }
        if let Some(v) = ov.checkpoint {
            self.migration.checkpoint = v;
        }
        if let Some(v) = ov.skip_existing {
            self.migration.skip_existing = v;
        }
        if let Some(v) = ov.resume {
            self.migration.resume = v;
        }
        if let Some(v) = ov.show_progress {
            self.migration.show_progress = v;
        }
        if let Some(v) = ov.log_level {
            self.log_level = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            bail!("source endpoint is required");
        }
        if self.source.access_key.is_empty() {
            bail!("source access key is required");
        }
        if self.source.secret_key.is_empty() {
            bail!("source secret key is required");
        }
        if self.target.endpoint.is_empty() {
            bail!("target endpoint is required");
        }
        if self.target.access_key.is_empty() {
            bail!("target access key is required");
        }
        if self.target.secret_key.is_empty() {
            bail!("target secret key is required");
        }
        if self.migration.bucket.is_empty() {
            bail!("bucket is required");
        }
        if self.migration.concurrency == 0 {
            bail!("concurrency must be positive");
        }
        if self.migration.retries == 0 {
            bail!("retries must be positive");
        }
        if self.migration.part_size < MIN_PART_SIZE {
            bail!(
                "part size must be at least {} bytes (got {})",
                MIN_PART_SIZE,
                self.migration.part_size
            );
        }
        match self.log_level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => bail!("invalid log level {other:?} (expected debug/info/warn/error)"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_overrides() -> Overrides {
        Overrides {
            src_endpoint: Some("minio:9000".into()),
            src_access_key: Some("ak".into()),
            src_secret_key: Some("sk".into()),
            dst_endpoint: Some("rustfs:9000".into()),
            dst_access_key: Some("ak2".into()),
            dst_secret_key: Some("sk2".into()),
            bucket: Some("data".into()),
            ..Overrides::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let cfg = Config::load(None, minimal_overrides()).unwrap();
        assert_eq!(cfg.migration.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(cfg.migration.multipart_threshold, 104_857_600);
        assert_eq!(cfg.migration.part_size, 67_108_864);
        assert_eq!(cfg.migration.retries, 5);
        assert_eq!(cfg.migration.retry_backoff_ms, 500);
        assert!(cfg.migration.skip_existing);
        assert!(cfg.migration.show_progress);
        assert!(!cfg.migration.dry_run);
        assert!(!cfg.source.secure);
        assert!(cfg.target.secure);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn file_values_overridden_by_flags() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "source:\n  endpoint: filehost:9000\n  access_key: file-ak\n  secret_key: file-sk\n\
             target:\n  endpoint: filedst:9000\n  access_key: file-ak2\n  secret_key: file-sk2\n\
             migration:\n  bucket: file-bucket\n  concurrency: 4\n  part_size: 8388608\n\
             log_level: warn"
        )
        .unwrap();
        file.flush().unwrap();

        let ov = Overrides {
            concurrency: Some(32),
            ..Overrides::default()
        };
        let cfg = Config::load(Some(file.path()), ov).unwrap();
        // flag wins
        assert_eq!(cfg.migration.concurrency, 32);
        // file values untouched by absent flags
        assert_eq!(cfg.source.endpoint, "filehost:9000");
        assert_eq!(cfg.migration.bucket, "file-bucket");
        assert_eq!(cfg.migration.part_size, 8_388_608);
        assert_eq!(cfg.log_level, "warn");
    }

    #[test]
    fn missing_bucket_rejected() {
        let mut ov = minimal_overrides();
        ov.bucket = None;
        let err = Config::load(None, ov).unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn small_part_size_rejected() {
        let mut ov = minimal_overrides();
        ov.part_size = Some(1024 * 1024);
        let err = Config::load(None, ov).unwrap_err();
        assert!(err.to_string().contains("part size"));
    }

    #[test]
    fn invalid_log_level_rejected() {
        let mut ov = minimal_overrides();
        ov.log_level = Some("trace".into());
        assert!(Config::load(None, ov).is_err());
    }
}
