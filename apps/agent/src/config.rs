//! Agent configuration management.
//!
//! Configuration is stored as TOML at `$COURIER_CONFIG`, or `./courier.toml`
//! when the variable is unset. A missing file is created with defaults; an
//! existing file with missing keys is rewritten with the defaults filled in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use courier_pipeline::PipelineConfig;
use courier_transfer::ClientConfig;
use courier_watcher::{StabilityStrategy, WatchConfig};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "courier.toml";

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub directories: DirectoriesSection,
    pub log: LogSection,
    pub workers: WorkersSection,
    pub watch: WatchSection,
}

/// Upload endpoint and TLS material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// URL path the files are posted to.
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default)]
    pub use_https: bool,

    /// Extra PEM root certificate trusted for HTTPS (empty = none).
    #[serde(default)]
    pub ca_file: String,

    /// PEM client certificate for mutual TLS (empty = none).
    #[serde(default)]
    pub cert_file: String,

    /// PEM private key matching `cert_file`.
    #[serde(default)]
    pub key_file: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesSection {
    /// Directory watched for new files.
    #[serde(default = "default_send_dir")]
    pub send_dir: PathBuf,

    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// Log file name inside `directories.log_dir`.
    #[serde(default = "default_log_file")]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stability_threshold_ms")]
    pub stability_threshold_ms: u64,

    /// `elapsed` or `size_unchanged`.
    #[serde(default)]
    pub strategy: StabilityStrategy,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    14080
}

fn default_context() -> String {
    "upload".into()
}

fn default_timeout_secs() -> u64 {
    courier_transfer::DEFAULT_TIMEOUT.as_secs()
}

fn default_username() -> String {
    "admin".into()
}

fn default_password() -> String {
    "password".into()
}

fn default_send_dir() -> PathBuf {
    PathBuf::from("./send/")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./archive/")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs/")
}

fn default_log_file() -> String {
    "app_daily.log".into()
}

fn default_worker_count() -> usize {
    courier_pipeline::DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    courier_pipeline::DEFAULT_QUEUE_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    courier_watcher::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_stability_threshold_ms() -> u64 {
    courier_watcher::DEFAULT_STABILITY_THRESHOLD.as_millis() as u64
}

fn default_shutdown_grace_secs() -> u64 {
    courier_pipeline::DEFAULT_SHUTDOWN_GRACE.as_secs()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            context: default_context(),
            use_https: false,
            ca_file: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
        }
    }
}

impl Default for DirectoriesSection {
    fn default() -> Self {
        Self {
            send_dir: default_send_dir(),
            archive_dir: default_archive_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stability_threshold_ms: default_stability_threshold_ms(),
            strategy: StabilityStrategy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// How the configuration file was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No file existed; defaults were written.
    Created,
    /// The file existed. `added` lists `section.key` entries that were
    /// missing and have been written back with default values.
    Existing { added: Vec<String> },
}

impl Config {
    /// Loads `path`, creating or completing the file as needed.
    pub fn load(path: &Path) -> anyhow::Result<(Self, ConfigSource)> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            return Ok((config, ConfigSource::Created));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("error loading {}", path.display()))?;
        let raw: toml::Table = toml::from_str(&content)
            .with_context(|| format!("invalid TOML in {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        let added = config.missing_keys(&raw)?;
        if !added.is_empty() {
            config.save(path)?;
        }
        Ok((config, ConfigSource::Existing { added }))
    }

    /// Writes the configuration to `path` (mode 600 on Unix).
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("error writing {}", path.display()))?;

        // Holds the upload password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Lists `section.key` entries present in the full configuration but
    /// absent from `raw`.
    fn missing_keys(&self, raw: &toml::Table) -> anyhow::Result<Vec<String>> {
        let full = toml::Value::try_from(self)?;
        let Some(full) = full.as_table() else {
            return Ok(Vec::new());
        };
        let mut missing = Vec::new();

        for (section, value) in full {
            let Some(keys) = value.as_table() else {
                continue;
            };
            let present = raw.get(section).and_then(toml::Value::as_table);
            for key in keys.keys() {
                if !present.is_some_and(|t| t.contains_key(key)) {
                    missing.push(format!("{section}.{key}"));
                }
            }
        }
        Ok(missing)
    }

    /// Rejects values the agent cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.trim().is_empty() {
            bail!("server.host must not be empty");
        }
        if self.server.port == 0 {
            bail!("server.port must not be 0");
        }
        if self.server.timeout_secs == 0 {
            bail!("server.timeout_secs must be positive");
        }
        if self.workers.count == 0 {
            bail!("workers.count must be at least 1");
        }
        if self.watch.poll_interval_ms == 0 {
            bail!("watch.poll_interval_ms must be positive");
        }
        if self.watch.stability_threshold_ms == 0 {
            bail!("watch.stability_threshold_ms must be positive");
        }
        if self.server.cert_file.is_empty() != self.server.key_file.is_empty() {
            bail!("server.cert_file and server.key_file must be set together");
        }
        Ok(())
    }

    /// Upload URL: `{http|https}://host:port/context`.
    pub fn endpoint(&self) -> String {
        let scheme = if self.server.use_https { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}/{}",
            self.server.host,
            self.server.port,
            self.server.context.trim_start_matches('/')
        )
    }

    /// HTTP client settings. TLS files apply only with `use_https`.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new(
            self.endpoint(),
            self.auth.username.clone(),
            self.auth.password.clone(),
        );
        client.timeout = Duration::from_secs(self.server.timeout_secs);

        if self.server.use_https {
            client.ca_file = non_empty(&self.server.ca_file);
            client.client_cert = non_empty(&self.server.cert_file);
            client.client_key = non_empty(&self.server.key_file);
        }
        client
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut watch = WatchConfig::new(&self.directories.send_dir);
        watch.poll_interval = Duration::from_millis(self.watch.poll_interval_ms);
        watch.stability_threshold = Duration::from_millis(self.watch.stability_threshold_ms);

        let mut config = PipelineConfig::new(watch);
        config.workers = self.workers.count;
        config.queue_capacity = self.workers.queue_capacity;
        config.strategy = self.watch.strategy;
        config
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.watch.shutdown_grace_secs)
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.directories.log_dir.join(&self.log.file)
    }

    /// Creates the send, archive and log directories.
    pub fn create_directories(&self) -> anyhow::Result<()> {
        for dir in [
            &self.directories.send_dir,
            &self.directories.archive_dir,
            &self.directories.log_dir,
        ] {
            create_dir(dir).with_context(|| format!("error creating directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<PathBuf> {
    (!value.trim().is_empty()).then(|| PathBuf::from(value))
}

fn create_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path)
}

/// Returns the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
