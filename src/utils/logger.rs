//! 日志系统模块
//!
//! 基于 tracing 生态实现引擎的日志输出：
//!
//! - 控制台输出（默认写到 stderr，标准输出留给命令结果）
//! - 可选的文件输出，按时间轮转
//! - 文本或 JSON 格式
//! - `RUST_LOG` 优先于配置中的级别
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_modules::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .file_output("./logs")
//!     .rotation(RotationStrategy::Daily)
//!     .build();
//!
//! let _guard = Logger::init(config).unwrap();
//! tracing::info!(module_id = "blog", "模块已加载");
//! ```

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// 日志文件名前缀
pub const DEFAULT_FILE_PREFIX: &str = "chips-modules";

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每分钟轮转
    Minutely,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

impl FromStr for RotationStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "never" | "none" => Ok(RotationStrategy::Never),
            "minutely" | "minute" => Ok(RotationStrategy::Minutely),
            "hourly" | "hour" => Ok(RotationStrategy::Hourly),
            "daily" | "day" => Ok(RotationStrategy::Daily),
            other => Err(CoreError::InvalidConfigValue {
                key: "logging.rotation".to_string(),
                reason: format!("未知的轮转策略: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Minutely => "minutely",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        };
        f.write_str(s)
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 控制台输出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleTarget {
    /// 不输出到控制台
    Off,
    /// 标准输出
    Stdout,
    /// 标准错误
    #[default]
    Stderr,
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别（`trace` / `debug` / `info` / `warn` / `error`）
    pub level: String,

    /// 是否使用 JSON 格式
    pub json_format: bool,

    /// 控制台输出目标
    pub console: ConsoleTarget,

    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    /// 日志轮转策略
    pub rotation: RotationStrategy,

    /// 保留的日志文件数
    pub max_files: usize,

    /// 是否显示 target
    pub show_target: bool,

    /// 是否显示文件名和行号
    pub show_file_line: bool,

    /// 额外的过滤指令（EnvFilter 格式），例如 `chips_modules::module::dependency=trace`
    pub filter_directives: Option<String>,

    /// 控制台是否启用 ANSI 颜色
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console: ConsoleTarget::default(),
            file_output: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            show_target: true,
            show_file_line: false,
            filter_directives: None,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::new()
    }

    /// 从配置文件中的 [`LogConfig`] 创建
    ///
    /// 无法识别的轮转策略回退为按天轮转。
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: log_config.rotation.parse().unwrap_or_default(),
            max_files: log_config.max_files,
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置控制台输出目标
    pub fn console(mut self, target: ConsoleTarget) -> Self {
        self.config.console = target;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 设置保留文件数
    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    /// 显示 target
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 显示文件名和行号
    pub fn show_file_line(mut self, enable: bool) -> Self {
        self.config.show_file_line = enable;
        self
    }

    /// 设置过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时刷新挂起的日志。
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl LogGuard {
    fn empty() -> Self {
        Self {
            _guards: Vec::new(),
        }
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志系统
    ///
    /// 返回的 [`LogGuard`] 必须保持存活直到程序退出。
    ///
    /// # 错误
    ///
    /// 日志系统已初始化或过滤指令无效时返回 `InitFailed`。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = Self::create_env_filter(&config)?;
        let mut guard = LogGuard::empty();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        let console = match config.console {
            ConsoleTarget::Off => None,
            ConsoleTarget::Stdout => Some(tracing_appender::non_blocking(io::stdout())),
            ConsoleTarget::Stderr => Some(tracing_appender::non_blocking(io::stderr())),
        };
        if let Some((writer, worker)) = console {
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, config.ansi_colors));
        }

        if let Some(log_dir) = &config.file_output {
            let appender = RollingFileAppender::builder()
                .rotation(config.rotation.to_rotation())
                .filename_prefix(config.file_prefix.as_str())
                .filename_suffix("log")
                .max_log_files(config.max_files.max(1))
                .build(log_dir)
                .map_err(|e| CoreError::InitFailed(format!("无法创建日志文件: {}", e)))?;
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._guards.push(worker);
            layers.push(Self::layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    fn layer(config: &LoggerConfig, writer: NonBlocking, ansi: bool) -> BoxedLayer {
        let base = fmt::layer()
            .with_writer(writer)
            .with_target(config.show_target)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line);

        if config.json_format {
            base.json().with_ansi(false).boxed()
        } else {
            base.with_ansi(ansi).boxed()
        }
    }

    fn create_env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        // RUST_LOG 优先
        let mut filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level)
                .map_err(|e| CoreError::InitFailed(format!("无效的日志级别 {}: {}", config.level, e)))?,
        };

        if let Some(directives) = &config.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let parsed = directive.parse().map_err(|e| {
                    CoreError::InitFailed(format!("无效的过滤指令 {}: {}", directive, e))
                })?;
                filter = filter.add_directive(parsed);
            }
        }

        Ok(filter)
    }
}

// ============================================================================
// 便捷宏
// ============================================================================

/// 创建带模块上下文的 span
///
/// ```rust,ignore
/// let span = chips_modules::module_span!("blog", "on_install");
/// let _enter = span.enter();
/// ```
#[macro_export]
macro_rules! module_span {
    ($module_id:expr, $stage:expr) => {
        tracing::info_span!("module", module_id = %$module_id, stage = %$stage)
    };
}

/// 记录钩子执行失败
#[macro_export]
macro_rules! log_hook_failure {
    ($module_id:expr, $hook:expr, $error:expr) => {
        tracing::warn!(
            module_id = %$module_id,
            hook = %$hook,
            error = %$error,
            "生命周期钩子执行失败"
        )
    };
}
