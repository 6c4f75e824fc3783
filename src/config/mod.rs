// nachweisbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::BackupError;

const DEFAULT_BACKUP_DIR: &str = "/backups";
const DEFAULT_RETENTION_DAYS: i64 = 30;
/// Every Sunday at 02:00.
const DEFAULT_SCHEDULE_CRON: &str = "0 0 2 * * 0";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonBackupSection {
    pub enabled: Option<bool>,
    pub directory: Option<String>,
    pub retention_days: Option<i64>,
    pub schedule_cron: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonDatasourceSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonToolsSection {
    pub pg_dump: Option<String>,
    pub psql: Option<String>,
    pub gzip: Option<String>,
    pub tar: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonServerSection {
    pub bind_address: Option<String>,
    pub admin_token: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJsonConfig {
    #[serde(default)]
    pub backup: JsonBackupSection,
    #[serde(default)]
    pub datasource: JsonDatasourceSection,
    pub backend_root: Option<PathBuf>,
    #[serde(default)]
    pub tools: JsonToolsSection,
    #[serde(default)]
    pub server: JsonServerSection,
}

// Application's internal configuration structs

/// Effective backup settings. Immutable once built; a reload builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub retention_days: u32,
    pub schedule_cron: String,
}

/// Connection details derived from `datasource.*`.
#[derive(Clone, PartialEq, Eq)]
pub struct DatasourceConfig {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatasourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Program names (or absolute paths) of the external utilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    pub pg_dump: String,
    pub psql: String,
    pub gzip: String,
    pub tar: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".to_string(),
            psql: "psql".to_string(),
            gzip: "gzip".to_string(),
            tar: "tar".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub admin_token: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub datasource: DatasourceConfig,
    pub tools: ToolSettings,
    pub server: ServerConfig,
    pub backend_root: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        apply_env_overrides(&mut raw_json_config);

        let config = AppConfig::from_raw(raw_json_config)
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
        Ok(config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> std::result::Result<Self, BackupError> {
        let backup = load_backup_config(&raw.backup)?;
        let datasource = load_datasource_config(&raw.datasource)?;

        let defaults = ToolSettings::default();
        let tools = ToolSettings {
            pg_dump: non_blank(raw.tools.pg_dump).unwrap_or(defaults.pg_dump),
            psql: non_blank(raw.tools.psql).unwrap_or(defaults.psql),
            gzip: non_blank(raw.tools.gzip).unwrap_or(defaults.gzip),
            tar: non_blank(raw.tools.tar).unwrap_or(defaults.tar),
        };

        let server = ServerConfig {
            bind_address: non_blank(raw.server.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            admin_token: non_blank(raw.server.admin_token),
        };

        if let Some(root) = &raw.backend_root {
            if !root.is_absolute() {
                return Err(BackupError::ConfigInvalid(format!(
                    "backendRoot must be an absolute path, got {}",
                    root.display()
                )));
            }
        }

        Ok(AppConfig {
            backup,
            datasource,
            tools,
            server,
            backend_root: raw.backend_root,
        })
    }
}

/// Secrets may come from the environment (or a `.env` file) instead of config.json.
fn apply_env_overrides(raw: &mut RawJsonConfig) {
    if let Ok(password) = env::var("DATASOURCE_PASSWORD") {
        raw.datasource.password = Some(password);
    }
    if let Ok(token) = env::var("BACKUP_ADMIN_TOKEN") {
        raw.server.admin_token = Some(token);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

pub fn load_backup_config(section: &JsonBackupSection) -> std::result::Result<BackupConfig, BackupError> {
    let directory = section
        .directory
        .clone()
        .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string());
    if directory.trim().is_empty() {
        return Err(BackupError::ConfigInvalid(
            "backup.directory cannot be blank".to_string(),
        ));
    }
    let directory = PathBuf::from(directory.trim());
    if !directory.is_absolute() {
        return Err(BackupError::ConfigInvalid(format!(
            "backup.directory must be an absolute path, got {}",
            directory.display()
        )));
    }

    let retention_days = section.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let retention_days = u32::try_from(retention_days).map_err(|_| {
        BackupError::ConfigInvalid(format!(
            "backup.retentionDays must be between 0 and {}, got {}",
            u32::MAX,
            retention_days
        ))
    })?;

    let schedule_cron = section
        .schedule_cron
        .clone()
        .unwrap_or_else(|| DEFAULT_SCHEDULE_CRON.to_string());
    if schedule_cron.trim().is_empty() {
        return Err(BackupError::ConfigInvalid(
            "backup.scheduleCron cannot be blank".to_string(),
        ));
    }

    Ok(BackupConfig {
        enabled: section.enabled.unwrap_or(true),
        directory,
        retention_days,
        schedule_cron: schedule_cron.trim().to_string(),
    })
}

pub fn load_datasource_config(
    section: &JsonDatasourceSection,
) -> std::result::Result<DatasourceConfig, BackupError> {
    let url = section
        .url
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| BackupError::ConfigInvalid("datasource.url must be set".to_string()))?;

    let parsed = parse_datasource_url(url)?;

    let username = non_blank(section.username.clone())
        .or(parsed.username)
        .ok_or_else(|| {
            BackupError::ConfigInvalid(
                "datasource.username must be set (or embedded in datasource.url)".to_string(),
            )
        })?;
    let password = section
        .password
        .clone()
        .or(parsed.password)
        .unwrap_or_default();

    Ok(DatasourceConfig {
        host: parsed.host,
        port: parsed.port,
        database: parsed.database,
        username,
        password,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsedDatasourceUrl {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Extracts host, port and database name from a connection URL.
///
/// Accepts both plain (`postgresql://host:5432/db`) and JDBC-style
/// (`jdbc:postgresql://host:5432/db`) URLs. The database name is the final path segment.
pub fn parse_datasource_url(raw_url: &str) -> std::result::Result<ParsedDatasourceUrl, BackupError> {
    let trimmed = raw_url.trim();
    let without_jdbc = trimmed.strip_prefix("jdbc:").unwrap_or(trimmed);
    let parsed = Url::parse(without_jdbc).map_err(|e| {
        BackupError::ConfigInvalid(format!("Invalid datasource.url format: {}", e))
    })?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BackupError::ConfigInvalid("datasource.url has no host".to_string()))?
        .to_string();

    let database = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| {
            BackupError::ConfigInvalid(format!("Database name not found in URL path: {}", trimmed))
        })?;

    let username = Some(parsed.username().to_string()).filter(|u| !u.is_empty());
    let password = parsed.password().map(str::to_string);

    Ok(ParsedDatasourceUrl {
        host,
        port: parsed.port(),
        database,
        username,
        password,
    })
}

/// Resolves the config file location: `NACHWEIS_CONFIG` or `./config.json`.
pub fn config_path() -> PathBuf {
    env::var("NACHWEIS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"))
}
