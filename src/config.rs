use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::filter::ExclusionSet;
use crate::github::{Scope, DEFAULT_API_URL, MAX_PAGE_SIZE};

/// Upper bound on concurrent sync workers
pub const MAX_WORKERS: usize = 16;

/// Workers started per available CPU
const WORKERS_PER_CPU: usize = 2;

/// File-backed configuration for hubmirror
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Directory the repositories are mirrored into
    #[serde(default)]
    pub base_directory: Option<String>,

    /// GitHub account and API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// User or organization to mirror; all accessible repositories if unset
    #[serde(default)]
    pub account: Option<String>,

    /// API token; prefer the GITHUB_TOKEN environment variable
    #[serde(default)]
    pub secret: Option<String>,

    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Repositories requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SyncConfig {
    /// Repository names to leave out
    #[serde(default)]
    pub skip: Vec<String>,

    /// Concurrent sync workers; derived from the CPU count if unset
    #[serde(default)]
    pub workers: Option<usize>,

    /// Local directory layout
    #[serde(default)]
    pub layout: Layout,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level used when neither RUST_LOG nor -v is given
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// How a repository maps to a directory under the base directory
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `base/name`
    #[default]
    Flat,
    /// `base/owner/name`
    Owner,
}

// Default value functions
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            account: None,
            secret: None,
            api_url: default_api_url(),
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Config {
    /// Load `path` if given, else the default location if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_config_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", default_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("hubmirror").join("config.yml"))
    }

    /// Expand `~` and environment variables in configured paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(dir) = &self.base_directory {
            self.base_directory = Some(
                shellexpand::full(dir)
                    .context("Failed to expand base_directory path")?
                    .into_owned(),
            );
        }

        Ok(())
    }
}

/// Values supplied on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub account: Option<String>,
    pub secret: Option<String>,
    pub directory: Option<PathBuf>,
    pub skip: Option<String>,
    pub workers: Option<usize>,
    pub layout: Option<Layout>,
    pub api_url: Option<String>,
}

/// Immutable parameters of one mirror run
#[derive(Clone)]
pub struct Settings {
    pub account: Option<String>,
    pub secret: Option<String>,
    pub directory: PathBuf,
    pub exclusions: ExclusionSet,
    pub layout: Layout,
    pub workers: usize,
    pub api_url: String,
    pub page_size: u32,
}

impl Settings {
    /// Settings with defaults for everything but the target directory
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            account: None,
            secret: None,
            directory: directory.into(),
            exclusions: ExclusionSet::default(),
            layout: Layout::Flat,
            workers: default_workers(),
            api_url: DEFAULT_API_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Merge command-line overrides over the file configuration
    ///
    /// Credentials are not checked here; a run without them fails in
    /// [`Settings::scope`] before any request is made.
    pub fn resolve(overrides: Overrides, config: &Config) -> Result<Self, ConfigError> {
        let directory = overrides
            .directory
            .or_else(|| config.base_directory.as_ref().map(PathBuf::from))
            .ok_or(ConfigError::MissingDirectory)?;

        let exclusions = match &overrides.skip {
            Some(list) => ExclusionSet::parse(list),
            None => config.sync.skip.iter().collect(),
        };

        let workers = overrides
            .workers
            .or(config.sync.workers)
            .unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }

        Ok(Self {
            account: non_empty(overrides.account.or_else(|| config.github.account.clone())),
            secret: non_empty(overrides.secret.or_else(|| config.github.secret.clone())),
            directory,
            exclusions,
            layout: overrides.layout.unwrap_or(config.sync.layout),
            workers,
            api_url: overrides
                .api_url
                .unwrap_or_else(|| config.github.api_url.clone()),
            page_size: config.github.page_size,
        })
    }

    /// Listing scope implied by the credentials
    pub fn scope(&self) -> Result<Scope, ConfigError> {
        match (&self.account, &self.secret) {
            (Some(account), _) => Ok(Scope::Account(account.clone())),
            (None, Some(_)) => Ok(Scope::Authenticated),
            (None, None) => Err(ConfigError::MissingCredentials),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("account", &self.account)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("directory", &self.directory)
            .field("exclusions", &self.exclusions)
            .field("layout", &self.layout)
            .field("workers", &self.workers)
            .field("api_url", &self.api_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Two workers per available CPU, capped at [`MAX_WORKERS`]
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * WORKERS_PER_CPU).clamp(1, MAX_WORKERS)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert!(config.base_directory.is_none());
        assert!(config.github.account.is_none());
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.page_size, 100);
        assert!(config.sync.skip.is_empty());
        assert!(config.sync.workers.is_none());
        assert_eq!(config.sync.layout, Layout::Flat);
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.color);
    }

    #[test]
    #[serial]
    fn test_expand_paths() {
        env::set_var("TEST_HUBMIRROR_HOME", "/test/home");

        let mut config = Config {
            base_directory: Some("${TEST_HUBMIRROR_HOME}/backup".to_string()),
            ..Default::default()
        };

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.base_directory.as_deref(), Some("/test/home/backup"));

        env::remove_var("TEST_HUBMIRROR_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let result = Config::load_or_default(Some(Path::new("/nonexistent/hubmirror.yml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialized_and_loaded() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.base_directory = Some("/custom/path".to_string());
        config.github.account = Some("octocat".to_string());
        config.sync.skip = vec!["repo-a".to_string()];
        config.sync.workers = Some(8);
        config.sync.layout = Layout::Owner;

        let content = serde_yaml::to_string(&config).expect("Failed to serialize config");
        std::fs::write(&config_path, content).expect("Failed to write config");

        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.base_directory.as_deref(), Some("/custom/path"));
        assert_eq!(loaded.github.account.as_deref(), Some("octocat"));
        assert_eq!(loaded.sync.skip, vec!["repo-a".to_string()]);
        assert_eq!(loaded.sync.workers, Some(8));
        assert_eq!(loaded.sync.layout, Layout::Owner);
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("hubmirror"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
base_directory: "/srv/mirror"
github:
  account: "octocat"
  api_url: "https://github.example.com/api/v3"
  page_size: 50
sync:
  skip:
    - "repo-a"
    - "repo-b"
  workers: 3
  layout: owner
logging:
  level: "debug"
  color: false
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.base_directory.as_deref(), Some("/srv/mirror"));
        assert_eq!(config.github.account.as_deref(), Some("octocat"));
        assert!(config.github.secret.is_none());
        assert_eq!(config.github.api_url, "https://github.example.com/api/v3");
        assert_eq!(config.github.page_size, 50);
        assert_eq!(config.sync.skip.len(), 2);
        assert_eq!(config.sync.workers, Some(3));
        assert_eq!(config.sync.layout, Layout::Owner);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let mut config = Config::default();
        config.base_directory = Some("/from/file".to_string());
        config.github.account = Some("file-account".to_string());
        config.sync.skip = vec!["from-file".to_string()];
        config.sync.workers = Some(2);

        let overrides = Overrides {
            account: Some("cli-account".to_string()),
            directory: Some(PathBuf::from("/from/cli")),
            skip: Some("repo-a,repo-b".to_string()),
            workers: Some(5),
            layout: Some(Layout::Owner),
            ..Default::default()
        };

        let settings = Settings::resolve(overrides, &config).unwrap();
        assert_eq!(settings.account.as_deref(), Some("cli-account"));
        assert_eq!(settings.directory, PathBuf::from("/from/cli"));
        assert!(settings.exclusions.contains("repo-a"));
        assert!(!settings.exclusions.contains("from-file"));
        assert_eq!(settings.workers, 5);
        assert_eq!(settings.layout, Layout::Owner);
    }

    #[test]
    fn test_resolve_falls_back_to_file() {
        let mut config = Config::default();
        config.base_directory = Some("/from/file".to_string());
        config.sync.skip = vec!["from-file".to_string()];

        let settings = Settings::resolve(Overrides::default(), &config).unwrap();
        assert_eq!(settings.directory, PathBuf::from("/from/file"));
        assert!(settings.exclusions.contains("from-file"));
        assert_eq!(settings.workers, default_workers());
    }

    #[test]
    fn test_resolve_requires_directory() {
        let result = Settings::resolve(Overrides::default(), &Config::default());
        assert_matches!(result, Err(ConfigError::MissingDirectory));
    }

    #[test]
    fn test_resolve_rejects_zero_workers() {
        let overrides = Overrides {
            directory: Some(PathBuf::from("/tmp/x")),
            workers: Some(0),
            ..Default::default()
        };
        let result = Settings::resolve(overrides, &Config::default());
        assert_matches!(result, Err(ConfigError::InvalidWorkers));
    }

    #[test]
    fn test_empty_credentials_count_as_absent() {
        let overrides = Overrides {
            directory: Some(PathBuf::from("/tmp/x")),
            account: Some(String::new()),
            secret: Some(String::new()),
            ..Default::default()
        };
        let settings = Settings::resolve(overrides, &Config::default()).unwrap();
        assert!(settings.account.is_none());
        assert!(settings.secret.is_none());
        assert_matches!(settings.scope(), Err(ConfigError::MissingCredentials));
    }

    #[test]
    fn test_scope_derivation() {
        let mut settings = Settings::new("/tmp/x");
        assert_matches!(settings.scope(), Err(ConfigError::MissingCredentials));

        settings.secret = Some("tok".to_string());
        assert_eq!(settings.scope().unwrap(), Scope::Authenticated);

        settings.account = Some("octocat".to_string());
        assert_eq!(settings.scope().unwrap(), Scope::Account("octocat".to_string()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut settings = Settings::new("/tmp/x");
        settings.secret = Some("ghp_supersecret".to_string());
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("ghp_supersecret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_default_workers_bounds() {
        let workers = default_workers();
        assert!(workers >= 1 && workers <= MAX_WORKERS);
    }
}
