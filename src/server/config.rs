use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::monitoring::{ClassifierPolicy, ProbeConfig, SchedulerConfig};
use crate::notifications::NotificationConfig;

const ENV_PREFIX: &str = "APIWATCH_";

#[derive(Error, Debug)]
pub enum ServerConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// No URL means the in-memory history store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_dir: String,
    pub probe: ProbeConfig,
    pub scheduler: SchedulerConfig,
    pub classifier: ClassifierPolicy,
    pub notifications: NotificationConfig,
}

// The TOML file: flat keys plus one table per engine component.
#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct FileConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    log_dir: Option<String>,
    probe: ProbeConfig,
    scheduler: SchedulerConfig,
    classifier: ClassifierPolicy,
    notifications: NotificationConfig,
}

// `APIWATCH_*` variables. Only the knobs operators usually touch.
#[derive(Deserialize, Default, Debug)]
struct EnvConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    log_dir: Option<String>,
    max_concurrent_probes: Option<usize>,
    probe_timeout_seconds: Option<u64>,
    down_threshold: Option<u32>,
    webhook_url: Option<String>,
}

// Plain `DATABASE_URL`, as most tooling expects.
#[derive(Deserialize, Default, Debug)]
struct DatabaseEnv {
    database_url: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, ServerConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path.map(Path::new) {
            Some(path) if path.exists() => read_file(path)?,
            _ => FileConfig::default(),
        };

        // 2. Load from environment variables
        let mut env_config = envy::prefixed(ENV_PREFIX).from_env::<EnvConfig>()?;
        if env_config.database_url.is_none() {
            env_config.database_url = envy::from_env::<DatabaseEnv>()?.database_url;
        }

        // 3. Merge: environment overrides file
        Ok(Self::merge(file_config, env_config))
    }

    fn merge(file: FileConfig, env: EnvConfig) -> Self {
        let mut probe = file.probe;
        if let Some(timeout) = env.probe_timeout_seconds {
            probe.timeout_seconds = timeout;
        }
        let mut scheduler = file.scheduler;
        if let Some(max) = env.max_concurrent_probes {
            scheduler.max_concurrent_probes = max;
        }
        let mut classifier = file.classifier;
        if let Some(threshold) = env.down_threshold {
            classifier.down_threshold = threshold;
        }
        let mut notifications = file.notifications;
        if env.webhook_url.is_some() {
            notifications.webhook_url = env.webhook_url;
        }

        ServerConfig {
            listen_addr: env
                .listen_addr
                .or(file.listen_addr)
                .unwrap_or_else(default_listen_addr),
            database_url: env
                .database_url
                .or(file.database_url)
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: env
                .database_max_connections
                .or(file.database_max_connections)
                .unwrap_or(10),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            probe,
            scheduler,
            classifier,
            notifications,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(FileConfig::default(), EnvConfig::default())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ServerConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ServerConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ServerConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::AlertType;
    use std::io::Write;

    const SAMPLE: &str = r#"
listen_addr = "127.0.0.1:9000"
log_dir = "/var/log/apiwatch"

[probe]
timeout_seconds = 5

[scheduler]
max_concurrent_probes = 4
allowed_check_intervals = [60, 300]

[classifier]
down_threshold = 3
deprecated_fingerprints = ["abc123"]

[notifications]
webhook_url = "https://hooks.example.com/alerts"
notify_on = ["DOWN", "DEPRECATION"]
"#;

    #[test]
    fn defaults_without_file_or_env() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.log_dir, "logs");
        assert!(config.database_url.is_none());
        assert_eq!(config.probe.timeout_seconds, 10);
        assert_eq!(config.probe.max_body_bytes, 4096);
        assert_eq!(config.scheduler.max_concurrent_probes, 10);
        assert_eq!(config.scheduler.min_check_interval_seconds, 300);
        assert_eq!(config.scheduler.default_check_interval_seconds, 3600);
        assert_eq!(config.classifier.down_threshold, 2);
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn file_sections_fill_nested_configs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let parsed = read_file(file.path()).unwrap();
        let config = ServerConfig::merge(parsed, EnvConfig::default());

        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.log_dir, "/var/log/apiwatch");
        assert_eq!(config.probe.timeout_seconds, 5);
        // Untouched keys keep their defaults.
        assert_eq!(config.probe.max_body_bytes, 4096);
        assert_eq!(config.scheduler.max_concurrent_probes, 4);
        assert_eq!(config.scheduler.allowed_check_intervals, vec![60, 300]);
        assert_eq!(config.scheduler.window_size, 10);
        assert_eq!(config.classifier.down_threshold, 3);
        assert!(config.classifier.deprecated_fingerprints.contains("abc123"));
        assert_eq!(
            config.notifications.notify_on,
            vec![AlertType::Down, AlertType::Deprecation]
        );
    }

    #[test]
    fn environment_overrides_file() {
        let file: FileConfig = toml::from_str(SAMPLE).unwrap();
        let env = EnvConfig {
            listen_addr: Some("0.0.0.0:7000".to_string()),
            database_url: Some("postgres://localhost/apiwatch".to_string()),
            max_concurrent_probes: Some(32),
            down_threshold: Some(5),
            ..Default::default()
        };
        let config = ServerConfig::merge(file, env);
        assert_eq!(config.listen_addr, "0.0.0.0:7000");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/apiwatch"));
        assert_eq!(config.scheduler.max_concurrent_probes, 32);
        assert_eq!(config.classifier.down_threshold, 5);
        // Not overridden.
        assert_eq!(config.probe.timeout_seconds, 5);
    }

    #[test]
    fn malformed_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[scheduler\nmax_concurrent_probes = ").unwrap();
        assert!(matches!(
            read_file(file.path()),
            Err(ServerConfigError::Parse { .. })
        ));
    }

    #[test]
    fn blank_database_url_means_memory_store() {
        let env = EnvConfig {
            database_url: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(ServerConfig::merge(FileConfig::default(), env).database_url.is_none());
    }
}
