//! Configuration file
//!
//! Every section and field is optional; missing values take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use logbridge_k8s::{ConfigMapRef, FORWARDER_KEY};
use logbridge_logs::{TailConfig, TerminationPolicy};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub query: QueryConfig,
    pub tail: TailSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `logbridge_logs=debug`
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Partition the compiled queries select from
    pub source: String,
    /// Limit used by `compile` when none is given
    pub default_limit: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            source: "logrange.pipe=__default__".to_string(),
            default_limit: logbridge_logs::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TailSettings {
    pub source: PathBuf,
    pub history_lines: usize,
    pub tail_program: String,
    pub grep_program: String,
    pub zgrep_program: String,
    /// Not supported by busybox grep
    pub line_buffered: bool,
    pub interrupt_timeout_ms: u64,
    pub terminate_timeout_ms: u64,
    pub kill_timeout_ms: u64,
}

impl Default for TailSettings {
    fn default() -> Self {
        let defaults = TailConfig::default();
        Self {
            source: defaults.source,
            history_lines: defaults.history_lines,
            tail_program: defaults.tail_program,
            grep_program: defaults.grep_program,
            zgrep_program: defaults.zgrep_program,
            line_buffered: defaults.line_buffered,
            interrupt_timeout_ms: 200,
            terminate_timeout_ms: 400,
            kill_timeout_ms: 200,
        }
    }
}

impl TailSettings {
    pub fn to_tail_config(&self) -> TailConfig {
        TailConfig {
            source: self.source.clone(),
            history_lines: self.history_lines,
            tail_program: self.tail_program.clone(),
            grep_program: self.grep_program.clone(),
            zgrep_program: self.zgrep_program.clone(),
            line_buffered: self.line_buffered,
            termination: TerminationPolicy {
                interrupt_timeout: Duration::from_millis(self.interrupt_timeout_ms),
                terminate_timeout: Duration::from_millis(self.terminate_timeout_ms),
                kill_timeout: Duration::from_millis(self.kill_timeout_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigMapSettings {
    pub namespace: String,
    pub config_map: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl ConfigMapSettings {
    pub fn to_ref(&self) -> ConfigMapRef {
        ConfigMapRef::new(&self.namespace, &self.config_map)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    /// Worker template for generated forwarders
    pub template_file: PathBuf,
    /// Kubeconfig context; empty uses the in-cluster or default configuration
    pub kube_context: String,
    /// ConfigMap with the cluster forwarder entries
    pub gravity: ConfigMapSettings,
    /// ConfigMap with the log store forwarder document
    pub logrange: ConfigMapSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            template_file: PathBuf::from("/opt/logrange/gravity/config/forward-tmpl.json"),
            kube_context: String::new(),
            gravity: ConfigMapSettings {
                namespace: "kube-system".to_string(),
                config_map: "log-forwarders".to_string(),
                key: None,
            },
            logrange: ConfigMapSettings {
                namespace: "kube-system".to_string(),
                config_map: "lr-forwarder".to_string(),
                key: Some(FORWARDER_KEY.to_string()),
            },
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn forwarder_key(&self) -> &str {
        self.logrange.key.as_deref().unwrap_or(FORWARDER_KEY)
    }

    pub fn context(&self) -> Option<&str> {
        Some(self.kube_context.as_str()).filter(|c| !c.is_empty())
    }
}

impl AppConfig {
    /// Load and validate the configuration, using defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .context(format!("Failed to read config file {}", path.display()))?;
                Self::parse(&content)
                    .context(format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        let formats = ["json", "pretty"];
        if !formats.contains(&self.logging.format.as_str()) {
            bail!(
                "logging.format: must be one of: {}",
                formats.join(", ")
            );
        }
        if self.query.source.trim().is_empty() {
            bail!("query.source: must not be empty");
        }
        if self.tail.interrupt_timeout_ms == 0 {
            bail!("tail.interrupt_timeout_ms: must be greater than zero");
        }
        if self.sync.interval_secs == 0 {
            bail!("sync.interval_secs: must be greater than zero");
        }
        for (field, map) in [("sync.gravity", &self.sync.gravity), ("sync.logrange", &self.sync.logrange)] {
            if map.namespace.trim().is_empty() {
                bail!("{}.namespace: must not be empty", field);
            }
            if map.config_map.trim().is_empty() {
                bail!("{}.config_map: must not be empty", field);
            }
        }
        if self.sync.forwarder_key().is_empty() {
            bail!("sync.logrange.key: must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.query.source, "logrange.pipe=__default__");
        assert_eq!(config.query.default_limit, 1000);
        assert_eq!(config.tail.source, PathBuf::from("/var/log/messages"));
        assert_eq!(config.sync.forwarder_key(), "forward.json");
        assert_eq!(config.sync.context(), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::parse(
            r#"
            [logging]
            format = "json"

            [tail]
            line_buffered = true
            kill_timeout_ms = 50

            [sync]
            kube_context = "staging"
            gravity = { namespace = "monitoring", config_map = "forwarders" }
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(config.tail.line_buffered);
        assert_eq!(config.tail.history_lines, 100);
        assert_eq!(
            config.tail.to_tail_config().termination.kill_timeout,
            Duration::from_millis(50)
        );
        assert_eq!(config.sync.context(), Some("staging"));
        assert_eq!(
            config.sync.gravity.to_ref(),
            ConfigMapRef::new("monitoring", "forwarders")
        );
        assert_eq!(config.sync.logrange.config_map, "lr-forwarder");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sync.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.query.source = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sync.logrange.namespace = String::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tail.interrupt_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[query]\nsource = \"custom\"\ndefault_limit = 50").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.query.source, "custom");
        assert_eq!(config.query.default_limit, 50);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/logbridge.toml")));
        assert!(result.is_err());
    }
}
