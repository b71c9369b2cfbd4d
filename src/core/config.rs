//! 引擎配置
//!
//! 定义模块引擎的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON
//! （按扩展名区分），缺省字段取默认值。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::module::hooks::HOOKS_FILENAME;
use crate::module::parser::DESCRIPTOR_FILENAME;
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 模块引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块目录列表
    #[serde(default = "default_module_dirs")]
    pub module_dirs: Vec<PathBuf>,

    /// 缓存目录（注册表缓存和生命周期状态）
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// 是否使用注册表缓存
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// 模块描述文件名
    #[serde(default = "default_descriptor_file")]
    pub descriptor_file: String,

    /// 外部命令钩子文件名
    #[serde(default = "default_hooks_file")]
    pub hooks_file: String,
}

fn default_module_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("modules")]
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_true() -> bool {
    true
}

fn default_descriptor_file() -> String {
    DESCRIPTOR_FILENAME.to_string()
}

fn default_hooks_file() -> String {
    HOOKS_FILENAME.to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_dirs: default_module_dirs(),
            cache_dir: default_cache_dir(),
            use_cache: true,
            descriptor_file: default_descriptor_file(),
            hooks_file: default_hooks_file(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 是否为开发模式（开发模式下不使用注册表缓存）
    #[serde(default)]
    pub dev_mode: bool,

    /// 数据目录，设置后相对的缓存目录位于其下
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            logging: LogConfig::default(),
            modules: ModuleConfig::default(),
            dev_mode: false,
            data_dir: None,
        }
    }
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。配置中的相对路径
    /// 以配置文件所在目录为基准。
    ///
    /// # 错误
    ///
    /// - 文件无法读取时返回 `ConfigLoadFailed`
    /// - 内容格式错误时返回 `Json` / `Yaml`
    /// - 配置值无效时返回 `InvalidConfigValue`
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let mut config: CoreConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else if content.trim().is_empty() {
            CoreConfig::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 将相对路径解析为以 `base` 为基准的路径
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let absolutize = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        if let Some(data_dir) = self.data_dir.as_mut() {
            absolutize(data_dir);
        }
        for dir in &mut self.modules.module_dirs {
            absolutize(dir);
        }
        if let Some(log_dir) = self.logging.log_dir.as_mut() {
            absolutize(log_dir);
        }

        match &self.data_dir {
            Some(data_dir) if self.modules.cache_dir.is_relative() => {
                self.modules.cache_dir = data_dir.join(&self.modules.cache_dir);
            }
            _ => absolutize(&mut self.modules.cache_dir),
        }
    }

    /// 实际生效的模块配置
    ///
    /// 开发模式下关闭注册表缓存。
    pub fn effective_modules(&self) -> ModuleConfig {
        let mut modules = self.modules.clone();
        if self.dev_mode {
            modules.use_cache = false;
        }
        modules
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| CoreError::InvalidConfigValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.modules.descriptor_file.trim().is_empty() {
            return Err(invalid("modules.descriptor_file", "不能为空"));
        }
        if self.modules.hooks_file.trim().is_empty() {
            return Err(invalid("modules.hooks_file", "不能为空"));
        }
        if self.modules.descriptor_file == self.modules.hooks_file {
            return Err(invalid("modules.hooks_file", "不能与描述文件同名"));
        }
        if !matches!(
            self.logging.rotation.as_str(),
            "daily" | "hourly" | "minutely" | "never"
        ) {
            return Err(invalid(
                "logging.rotation",
                "必须是 daily、hourly、minutely 或 never",
            ));
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(invalid("logging.log_dir", "启用文件日志时必须设置"));
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
    module_dirs_set: bool,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加模块目录
    ///
    /// 第一次调用时替换默认目录。
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if !self.module_dirs_set {
            self.config.modules.module_dirs.clear();
            self.module_dirs_set = true;
        }
        self.config.modules.module_dirs.push(dir.into());
        self
    }

    /// 设置缓存目录
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.cache_dir = dir.into();
        self
    }

    /// 关闭注册表缓存
    pub fn without_cache(mut self) -> Self {
        self.config.modules.use_cache = false;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 设置数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(dir.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}
