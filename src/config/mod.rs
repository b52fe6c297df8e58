use crate::errors::{AppError, AppResult};
use crate::models::division::Divisions;
use crate::utils::time::parse_timezone;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".rguestlog";
const CONFIG_FILE: &str = "rguestlog.conf";
const DATABASE_FILE: &str = "rguestlog.sqlite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: String,
    pub privkey: String,
    pub pubkey: String,
    #[serde(default = "default_divisions")]
    pub divisions: Vec<String>,
    /// Local hours (0-23) at which everyone is checked out and old data purged.
    #[serde(default = "default_autocheckout_hours")]
    pub autocheckout_hours: Vec<u32>,
    #[serde(default)]
    pub clean_on_start: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// IANA zone the scheduler and day queries work in, e.g. `Europe/Rome`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_min_overlap")]
    pub min_overlap_minutes: u32,
    /// Division indexes that produce contact edges; absent means all.
    #[serde(default)]
    pub traced_divisions: Option<Vec<usize>>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Serve HTTPS instead of plain HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// PEM certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_divisions() -> Vec<String> {
    vec!["Main".to_string()]
}
fn default_autocheckout_hours() -> Vec<u32> {
    vec![3]
}
fn default_retention_days() -> u32 {
    28
}
fn default_timezone() -> String {
    "Europe/Rome".to_string()
}
fn default_min_overlap() -> u32 {
    0
}
fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            tls: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::in_dir(&Self::config_dir())
    }
}

impl Config {
    /// Standard configuration directory (`~/.rguestlog`).
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Full path of the default config file
    pub fn config_file() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    /// Defaults with every file placed inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        let path = |name: &str| dir.join(name).to_string_lossy().to_string();
        Self {
            database: path(DATABASE_FILE),
            privkey: path("privkey.key"),
            pubkey: path("pubkey.pub"),
            divisions: default_divisions(),
            autocheckout_hours: default_autocheckout_hours(),
            clean_on_start: false,
            retention_days: default_retention_days(),
            timezone: default_timezone(),
            min_overlap_minutes: default_min_overlap(),
            traced_divisions: None,
            http: HttpConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "configuration file {} not found (run `rguestlog init` first)",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write the configuration as YAML, creating the parent directory.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| AppError::Config(format!("cannot serialize configuration: {}", e)))?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(())
    }

    pub fn division_list(&self) -> AppResult<Divisions> {
        Divisions::new(self.divisions.clone())
    }

    pub fn validate(&self) -> AppResult<()> {
        let divisions = self.division_list()?;

        if let Some(hour) = self.autocheckout_hours.iter().find(|h| **h > 23) {
            return Err(AppError::Config(format!(
                "autocheckout hour {} is out of range 0-23",
                hour
            )));
        }
        if self.retention_days == 0 {
            return Err(AppError::Config("retention_days must be at least 1".into()));
        }
        parse_timezone(&self.timezone)?;

        if let Some(traced) = &self.traced_divisions
            && let Some(bad) = traced.iter().find(|i| **i >= divisions.len())
        {
            return Err(AppError::Config(format!(
                "traced division {} does not exist ({} configured)",
                bad,
                divisions.len()
            )));
        }
        if self.http.port == 0 {
            return Err(AppError::Config("http.port must not be 0".into()));
        }
        if let Some(tls) = &self.http.tls
            && (tls.cert.trim().is_empty() || tls.key.trim().is_empty())
        {
            return Err(AppError::Config(
                "http.tls needs both a cert and a key path".into(),
            ));
        }
        Ok(())
    }
}
