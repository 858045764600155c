use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

pub const CONFIG_FILE_NAME: &str = "jgi-query.json";
pub const DEFAULT_PORTAL_URL: &str = "https://genome.jgi.doe.gov";
pub const DEFAULT_SIGNON_URL: &str = "https://signon.jgi.doe.gov/signon/create";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_file_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_max_age_secs: Option<u64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub categories: Vec<String>,
    pub portal_url: String,
    pub signon_url: String,
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub min_file_bytes: u64,
    pub session_max_age: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_path() -> Result<PathBuf, QueryError> {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("jgi-query").join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                QueryError::Filesystem("unable to resolve config directory".to_string())
            })
    }

    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, QueryError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        let config = Self::load(&config_path)?;
        Self::resolve_config(config, &config_path)
    }

    pub fn load(path: &Path) -> Result<Config, QueryError> {
        if !path.exists() {
            return Err(QueryError::MissingConfig(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|_| QueryError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| QueryError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, path: &Path) -> Result<ResolvedConfig, QueryError> {
        let user = config.user.filter(|value| !value.trim().is_empty());
        let password = config.password.filter(|value| !value.is_empty());
        let (Some(user), Some(password)) = (user, password) else {
            return Err(QueryError::MissingCredentials(path.to_path_buf()));
        };

        let categories = config
            .categories
            .filter(|values| !values.is_empty())
            .unwrap_or_else(default_categories);

        Ok(ResolvedConfig {
            credentials: Credentials {
                user: user.trim().to_string(),
                password,
            },
            categories,
            portal_url: trim_url(config.portal_url.as_deref().unwrap_or(DEFAULT_PORTAL_URL)),
            signon_url: config
                .signon_url
                .unwrap_or_else(|| DEFAULT_SIGNON_URL.to_string()),
            retries: config.retries.unwrap_or(3),
            retry_delay: Duration::from_secs(config.retry_delay_secs.unwrap_or(5)),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(300)),
            min_file_bytes: config.min_file_bytes.unwrap_or(20),
            session_max_age: Duration::from_secs(config.session_max_age_secs.unwrap_or(300)),
        })
    }

    pub fn write(path: &Path, config: &Config) -> Result<(), QueryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| QueryError::Filesystem(err.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(config)
            .map_err(|err| QueryError::Filesystem(err.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &content).map_err(|err| QueryError::Filesystem(err.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|err| QueryError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn trim_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

pub fn default_categories() -> Vec<String> {
    [
        "ESTs",
        "EST Clusters",
        "Assembled scaffolds (unmasked)",
        "Assembled scaffolds (masked)",
        "Transcripts",
        "Genes",
        "CDS",
        "Proteins",
        "Additional Files",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
