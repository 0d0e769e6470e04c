use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "LDTOOLS_CONFIG";

/// 配置根结构，各段缺失时取默认值。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.analytics.validate().map_err(|message| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `LDTOOLS_CONFIG`，否则寻找 `./config/ldtools.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("ldtools.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 零件库位置。每个根目录下按 `search_folders` 的顺序查找。
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default = "LibraryConfig::default_search_folders")]
    pub search_folders: Vec<String>,
    /// 文件监视线程到文档线程的事件通道容量。
    #[serde(default = "LibraryConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl LibraryConfig {
    fn default_search_folders() -> Vec<String> {
        vec!["parts".to_string(), "p".to_string(), String::new()]
    }

    fn default_event_capacity() -> usize {
        256
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            search_folders: Self::default_search_folders(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

/// 分析阈值。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "AnalyticsConfig::default_warp_warning")]
    pub warp_warning: f64,
    #[serde(default = "AnalyticsConfig::default_warp_error")]
    pub warp_error: f64,
    #[serde(default = "AnalyticsConfig::default_singular_tolerance")]
    pub singular_tolerance: f64,
}

impl AnalyticsConfig {
    fn default_warp_warning() -> f64 {
        0.2
    }

    fn default_warp_error() -> f64 {
        0.5
    }

    fn default_singular_tolerance() -> f64 {
        1e-9
    }

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.warp_warning) || !(0.0..=1.0).contains(&self.warp_error) {
            return Err("翘曲阈值必须位于 [0, 1]".to_string());
        }
        if self.warp_warning > self.warp_error {
            return Err("warp_warning 不能大于 warp_error".to_string());
        }
        if !(self.singular_tolerance >= 0.0) {
            return Err("singular_tolerance 不能为负".to_string());
        }
        Ok(())
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            warp_warning: Self::default_warp_warning(),
            warp_error: Self::default_warp_error(),
            singular_tolerance: Self::default_singular_tolerance(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置文件 {path:?} 无效: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
