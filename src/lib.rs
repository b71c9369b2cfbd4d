//! # Chips Modules - 模块依赖与生命周期引擎
//!
//! 负责发现应用中的功能模块、解析模块间的版本化依赖、计算确定的加载顺序，
//! 并在模块安装、升级、启用、禁用和启动前后执行生命周期钩子：
//!
//! - **版本与约束**: `1.2.3`、`^1.2`、`~1.2.3`、`>=1.0,<2.0`、`*`
//! - **模块发现**: 扫描模块目录，读取 `module.yaml` 或识别旧式标记文件
//! - **依赖解析**: 深度优先的拓扑排序，检测缺失依赖、循环依赖、版本不符和冲突
//! - **注册表**: 带缓存的模块注册表，目录未变时跳过重新解析
//! - **加载器**: 按顺序激活模块，延迟模块在首个匹配路由时激活
//! - **生命周期**: 基于已安装版本记录驱动安装、升级等钩子
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_modules::{CoreConfig, InMemoryContainer, ModuleManager};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder().module_dir("./modules").build();
//!     let mut manager = ModuleManager::from_config(&config.effective_modules());
//!
//!     let mut boot = manager.boot(InMemoryContainer::new())?;
//!     let activated = boot.loader.load_for_route("/admin/users")?;
//!     println!("按需激活: {:?}", activated);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 版本、描述、发现、解析、注册表、加载器和生命周期
//! - `core` - 引擎配置
//! - `utils` - 错误类型和日志系统

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    discover, resolve, satisfies, CapabilityContainer, DependencyGraph, DependencyResolver,
    Discovery, HookKind, HookProvider, HookRegistry, HookStatus, InMemoryContainer, LifecycleManager,
    LoadState, ModuleDescriptor, ModuleLoader, ModuleManager, ModuleRegistry, Resolution,
    SetupReport, Version, VersionConstraint,
};

pub use utils::{error_code, CoreError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig};

pub use core::config::{CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
