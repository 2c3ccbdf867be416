use crate::core::catalog::default_components_dir;
use crate::core::ConfigProvider;
use crate::providers::base::DEFAULT_DOMAIN;
use crate::providers::docker::DEFAULT_BASE_IMAGE;
use crate::utils::error::{ChessboardError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const LOG_FORMATS: &[&str] = &["compact", "json"];

/// Contents of `chessboard.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessboardConfig {
    pub planner: PlannerConfig,
    pub catalog: CatalogConfig,
    pub docker: DockerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Domain for resource DNS names when the deployment sets none.
    pub domain: String,
    pub parse_only: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            parse_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub components_dir: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            components_dir: default_components_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub base_image: String,
    pub workdir: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            workdir: PathBuf::from("./docker-build"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
            verbose: false,
        }
    }
}

impl ChessboardConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ChessboardError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ChessboardError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CHESSBOARD_DOMAIN})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ChessboardError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Loads `path` when it exists, otherwise the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

impl ConfigProvider for ChessboardConfig {
    fn domain(&self) -> &str {
        &self.planner.domain
    }

    fn parse_only(&self) -> bool {
        self.planner.parse_only
    }

    fn components_dir(&self) -> &Path {
        &self.catalog.components_dir
    }

    fn base_image(&self) -> &str {
        &self.docker.base_image
    }

    fn workdir(&self) -> &Path {
        &self.docker.workdir
    }
}

impl Validate for ChessboardConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_domain("planner.domain", &self.planner.domain)?;
        validation::validate_path(
            "catalog.components_dir",
            &self.catalog.components_dir.to_string_lossy(),
        )?;
        validation::validate_non_empty_string("docker.base_image", &self.docker.base_image)?;
        validation::validate_path("docker.workdir", &self.docker.workdir.to_string_lossy())?;
        validation::validate_one_of("logging.format", &self.logging.format, LOG_FORMATS)?;
        Ok(())
    }
}
