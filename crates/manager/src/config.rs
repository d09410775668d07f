use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use hms_backup_storage::{DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE};
use serde::Deserialize;

/// Business tables backed up when no list is configured, in backup order.
pub const DEFAULT_TABLES: &[&str] = &[
    "patients",
    "doctors",
    "staff",
    "appointments",
    "bills",
    "bill_items",
    "medicines",
];

const DEFAULT_ROOT: &str = "./backups";
const DEFAULT_LISTEN: &str = "127.0.0.1:8089";
const DEFAULT_MAX_SNAPSHOTS: usize = 30;
const DEFAULT_SCHEDULE_HOUR: u32 = 2;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backup: BackupConfig,
    pub data_store: DataStoreConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
    pub schedule_hour: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub root: Option<String>,
    pub tables: Option<Vec<String>>,
    pub max_snapshots: Option<usize>,
    pub page_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub activity_log: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DataStoreConfig {
    pub kind: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub key_column: Option<String>,
    pub database_url: Option<String>,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub api_token: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStoreSettings {
    Rest {
        url: Option<String>,
        api_key: Option<String>,
        key_column: String,
    },
    Postgres {
        database_url: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

/// Effective settings after environment overrides and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub tables: Vec<String>,
    pub max_snapshots: usize,
    pub page_size: usize,
    pub batch_size: usize,
    pub activity_log: PathBuf,
    pub data_store: DataStoreSettings,
    pub listen: String,
    pub schedule_hour: u32,
    pub api_token: Option<String>,
}

impl Settings {
    pub fn from_env(cfg: &Config) -> Result<Self> {
        Self::resolve(cfg, |key| env::var(key).ok())
    }

    /// Environment values win over the config file, which wins over defaults.
    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root = PathBuf::from(
            env("HMS_BACKUP_ROOT")
                .or_else(|| cfg.backup.root.clone())
                .unwrap_or_else(|| DEFAULT_ROOT.to_owned()),
        );

        let tables: Vec<String> = match env("HMS_BACKUP_TABLES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
            None => cfg
                .backup
                .tables
                .clone()
                .unwrap_or_else(|| DEFAULT_TABLES.iter().map(|t| t.to_string()).collect()),
        };
        if tables.is_empty() {
            bail!("at least one table must be configured for backup");
        }

        let max_snapshots = numeric(&env, "HMS_BACKUP_MAX_SNAPSHOTS")?
            .or(cfg.backup.max_snapshots)
            .unwrap_or(DEFAULT_MAX_SNAPSHOTS);
        let page_size = numeric(&env, "HMS_BACKUP_PAGE_SIZE")?
            .or(cfg.backup.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let batch_size = numeric(&env, "HMS_BACKUP_BATCH_SIZE")?
            .or(cfg.backup.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let schedule_hour = numeric(&env, "HMS_BACKUP_SCHEDULE_HOUR")?
            .or(cfg.server.schedule_hour)
            .unwrap_or(DEFAULT_SCHEDULE_HOUR);

        if max_snapshots == 0 {
            bail!("max_snapshots must be at least 1");
        }
        if page_size == 0 || batch_size == 0 {
            bail!("page_size and batch_size must be at least 1");
        }
        if schedule_hour > 23 {
            bail!("schedule_hour must be between 0 and 23, got {schedule_hour}");
        }

        let activity_log = activity_log_path(cfg, &env);

        Ok(Self {
            data_store: data_store_settings(cfg, &env)?,
            listen: env("HMS_BACKUP_LISTEN")
                .or_else(|| cfg.server.listen.clone())
                .unwrap_or_else(|| DEFAULT_LISTEN.to_owned()),
            api_token: env("HMS_BACKUP_API_TOKEN").or_else(|| cfg.security.api_token.clone()),
            root,
            tables,
            max_snapshots,
            page_size,
            batch_size,
            activity_log,
            schedule_hour,
        })
    }
}

/// Activity log location, worked out without validating anything else so a
/// run that cannot start can still be logged.
pub fn activity_log_path(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = env("HMS_BACKUP_LOG").or_else(|| cfg.backup.activity_log.clone()) {
        return PathBuf::from(path);
    }
    env("HMS_BACKUP_ROOT")
        .or_else(|| cfg.backup.root.clone())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT))
        .join("backup.log")
}

fn data_store_settings(
    cfg: &Config,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<DataStoreSettings> {
    let ds = &cfg.data_store;
    let database_url = env("DATABASE_URL").or_else(|| ds.database_url.clone());
    let sqlite_path = env("HMS_SQLITE_PATH").or_else(|| ds.sqlite_path.clone());
    let kind = env("HMS_DATA_STORE_KIND").or_else(|| ds.kind.clone());

    let kind = match kind {
        Some(kind) => kind.to_ascii_lowercase(),
        None if database_url.is_some() => "postgres".to_owned(),
        None if sqlite_path.is_some() => "sqlite".to_owned(),
        None => "rest".to_owned(),
    };

    match kind.as_str() {
        "rest" => Ok(DataStoreSettings::Rest {
            url: env("DATA_STORE_URL").or_else(|| ds.url.clone()),
            api_key: env("DATA_STORE_KEY").or_else(|| ds.api_key.clone()),
            key_column: env("DATA_STORE_KEY_COLUMN")
                .or_else(|| ds.key_column.clone())
                .unwrap_or_else(|| "id".to_owned()),
        }),
        "postgres" => Ok(DataStoreSettings::Postgres {
            database_url: database_url.context("postgres data store needs DATABASE_URL")?,
        }),
        "sqlite" => Ok(DataStoreSettings::Sqlite {
            path: sqlite_path
                .map(PathBuf::from)
                .context("sqlite data store needs HMS_SQLITE_PATH")?,
        }),
        other => bail!("unknown data store kind: {other}"),
    }
}

fn numeric<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("{key} must be a non-negative integer, got {raw:?}"),
        },
        None => Ok(None),
    }
}
