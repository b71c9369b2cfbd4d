//! 核心模块
//!
//! 包含引擎配置。

pub mod config;

pub use config::{CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig};
