use crate::download::DownloaderConfig;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralSection,
    pub download: DownloadSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSection {
    pub log_level: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSection {
    /// Budget for one chunk request to one peer.
    pub request_timeout_secs: u64,
    /// Budget for establishing a peer connection.
    pub connect_timeout_secs: u64,
    pub output_dir: String,
    /// Defaults to the name carried by the stream descriptor.
    pub output_file_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralSection {
                log_level: "info".to_string(),
                data_dir: "./data".to_string(),
            },
            download: DownloadSection::default(),
        }
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 3,
            output_dir: ".".to_string(),
            output_file_name: None,
        }
    }
}

impl DownloadSection {
    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            output_dir: PathBuf::from(&self.output_dir),
            output_file_name: self.output_file_name.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    SerializeToml {
        source: toml::ser::Error,
    },
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, .. } => write!(f, "failed reading config file {}", path.display()),
            Self::Write { path, .. } => write!(f, "failed writing config file {}", path.display()),
            Self::Rename { from, to, .. } => {
                write!(
                    f,
                    "failed moving config file {} -> {}",
                    from.display(),
                    to.display()
                )
            }
            Self::CreateDir { path, .. } => {
                write!(f, "failed creating directory {}", path.display())
            }
            Self::ParseToml { path, .. } => write!(f, "invalid TOML in {}", path.display()),
            Self::SerializeToml { .. } => write!(f, "failed serializing config to TOML"),
            Self::NoConfigDir => write!(f, "could not resolve a config directory for this user"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Rename { source, .. }
            | Self::CreateDir { source, .. } => Some(source),
            Self::ParseToml { source, .. } => Some(source),
            Self::SerializeToml { source } => Some(source),
            Self::NoConfigDir => None,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = directories::ProjectDirs::from("io", "swarmstream", "swarmstream")
        .ok_or(ConfigError::NoConfigDir)?;
    Ok(proj.config_dir().join("config.toml"))
}

pub async fn load_or_create_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();

    if !path.exists() {
        let cfg = Config::default();
        save_config(path, &cfg).await?;
        return Ok(cfg);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

pub async fn save_config(path: impl AsRef<Path>, cfg: &Config) -> Result<()> {
    let path = path.as_ref();
    let rendered =
        toml::to_string_pretty(cfg).map_err(|source| ConfigError::SerializeToml { source })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    // Write-then-rename so a crash never leaves a truncated config behind.
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, rendered)
        .await
        .map_err(|source| ConfigError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| ConfigError::Rename {
            from: tmp,
            to: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Filter priority: `RUST_LOG`, then the configured level, then `info`.
pub fn init_tracing(config: &Config) {
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .unwrap_or_else(|| config.general.log_level.clone());
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}
