//! 模块管理模块
//!
//! 包含模块依赖与生命周期引擎的全部组件：
//! - 版本与版本约束
//! - 模块描述、解析与发现
//! - 依赖解析与注册表
//! - 加载器、生命周期钩子与管理器

pub mod cache;
pub mod constraint;
pub mod dependency;
pub mod discovery;
pub mod hooks;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod version;

// 重导出常用类型
pub use cache::{CacheStore, JsonFileStore, MemoryStore, RegistryCache};
pub use constraint::{satisfies, ConstraintExpr, VersionConstraint};
pub use dependency::{
    resolve, DependencyGraph, DependencyResolver, MissingOptional, MissingReason, Resolution,
};
pub use discovery::{discover, Discovery, Fingerprint};
pub use hooks::{CommandHooks, HookKind, HookProvider, HookRegistry, HookStatus};
pub use lifecycle::{HookFailure, LifecycleManager, LifecycleState, SetupReport, Upgrade};
pub use loader::{CapabilityContainer, InMemoryContainer, ModuleLoader};
pub use manager::{Boot, ModuleManager};
pub use metadata::{DescriptorSource, LoadState, ModuleDescriptor};
pub use parser::ModuleParser;
pub use registry::ModuleRegistry;
pub use version::Version;
