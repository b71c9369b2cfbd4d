//! 模块引擎错误类型定义
//!
//! 本模块定义了依赖解析、模块发现和生命周期管理中使用的所有错误类型。
//! 只有"致命"错误会以 `CoreError` 的形式返回给调用方；缓存失效、
//! 钩子执行失败等可恢复情况在各自组件内部降级处理，不会出现在这里。

use std::path::PathBuf;

use thiserror::Error;

/// 模块引擎核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 版本与约束错误 ====================

    /// 版本号格式无效
    #[error("无效的版本号 '{input}': {reason}")]
    VersionParse {
        input: String,
        reason: String,
    },

    /// 版本约束表达式无效
    #[error("无效的版本约束 '{constraint}': {reason}")]
    InvalidConstraint {
        constraint: String,
        reason: String,
    },

    // ==================== 模块描述错误 ====================

    /// 模块描述文件无效
    #[error("模块描述文件无效 {path:?}: {reason}")]
    InvalidDescriptor {
        path: PathBuf,
        reason: String,
    },

    /// 模块 ID 重复注册
    #[error("模块 '{id}' 重复注册: 已存在于 {existing:?}, 冲突位置 {duplicate:?}")]
    DuplicateModule {
        id: String,
        existing: PathBuf,
        duplicate: PathBuf,
    },

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    // ==================== 依赖解析错误 ====================

    /// 依赖缺失（不存在或已禁用）
    #[error("模块 '{module}' 依赖的模块 '{dependency}' 不存在或未启用")]
    MissingDependency {
        module: String,
        dependency: String,
    },

    /// 循环依赖，`module_a -> module_b` 是闭合环的那条边
    #[error("检测到循环依赖: '{module_a}' -> '{module_b}'")]
    CircularDependency {
        module_a: String,
        module_b: String,
    },

    /// 依赖版本不满足约束
    #[error("版本不匹配: 模块 '{module}' 要求 '{dependency}' 满足 '{constraint}', 实际版本为 {actual}")]
    VersionMismatch {
        module: String,
        dependency: String,
        constraint: String,
        actual: String,
    },

    /// 模块冲突
    #[error("模块冲突: '{module_a}' 与 '{module_b}' 不能同时启用")]
    ConflictDetected {
        module_a: String,
        module_b: String,
    },

    // ==================== 加载错误 ====================

    /// 模块加载失败
    #[error("模块加载失败: '{module_id}' - {reason}")]
    ModuleLoadFailed {
        module_id: String,
        reason: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 模块引擎操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 版本错误 (VERSION-xxx)
    pub const VERSION_INVALID: &str = "VERSION-001";
    pub const CONSTRAINT_INVALID: &str = "VERSION-002";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DESCRIPTOR_INVALID: &str = "MODULE-002";
    pub const MODULE_LOAD_FAILED: &str = "MODULE-003";
    pub const MODULE_DUPLICATE: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_MISSING_DEPENDENCY: &str = "MODULE-006";
    pub const MODULE_VERSION_MISMATCH: &str = "MODULE-007";
    pub const MODULE_CONFLICT: &str = "MODULE-008";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // IO 错误 (IO-xxx)
    pub const IO_FAILED: &str = "IO-001";
    pub const SERIALIZATION_FAILED: &str = "IO-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::VersionParse { .. } => error_code::VERSION_INVALID,
            CoreError::InvalidConstraint { .. } => error_code::CONSTRAINT_INVALID,
            CoreError::InvalidDescriptor { .. } => error_code::MODULE_DESCRIPTOR_INVALID,
            CoreError::DuplicateModule { .. } => error_code::MODULE_DUPLICATE,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::MissingDependency { .. } => error_code::MODULE_MISSING_DEPENDENCY,
            CoreError::CircularDependency { .. } => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::VersionMismatch { .. } => error_code::MODULE_VERSION_MISMATCH,
            CoreError::ConflictDetected { .. } => error_code::MODULE_CONFLICT,
            CoreError::ModuleLoadFailed { .. } => error_code::MODULE_LOAD_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::Io(_) => error_code::IO_FAILED,
            CoreError::Json(_) | CoreError::Yaml(_) => error_code::SERIALIZATION_FAILED,
            _ => "UNKNOWN",
        }
    }

    /// 是否为依赖图配置错误
    ///
    /// 这类错误需要运维人员修正模块配置，重试不会改变结果。
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            CoreError::MissingDependency { .. }
                | CoreError::CircularDependency { .. }
                | CoreError::VersionMismatch { .. }
                | CoreError::ConflictDetected { .. }
                | CoreError::DuplicateModule { .. }
        )
    }
}
