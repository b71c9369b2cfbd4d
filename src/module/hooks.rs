//! 生命周期钩子
//!
//! 每个模块可以提供安装、升级、启用、禁用以及启动前后的钩子。钩子有两种来源：
//!
//! - 通过 [`HookRegistry::register`] 注册的 [`HookProvider`] 实现
//! - 模块目录中的 `hooks.yaml`，将钩子名映射到外部命令（[`CommandHooks`]）
//!
//! 钩子不存在时返回 [`HookStatus::Skipped`]，这不是错误。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::debug;

use crate::module::metadata::ModuleDescriptor;
use crate::module::version::Version;
use crate::utils::{CoreError, Result};

/// 默认的钩子文件名
pub const HOOKS_FILENAME: &str = "hooks.yaml";

/// 钩子执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// 钩子存在并成功执行
    Ran,
    /// 模块没有提供该钩子
    Skipped,
}

impl HookStatus {
    /// 是否实际执行
    pub fn ran(&self) -> bool {
        matches!(self, HookStatus::Ran)
    }
}

/// 钩子种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookKind {
    /// 首次安装
    Install,
    /// 版本升级
    Upgrade,
    /// 启用
    Enable,
    /// 禁用
    Disable,
    /// 启动时，安装/升级之后
    BeforeSetup,
    /// 启动时，全部模块激活之后
    AfterSetup,
}

impl HookKind {
    /// 全部钩子
    pub const ALL: [HookKind; 6] = [
        HookKind::Install,
        HookKind::Upgrade,
        HookKind::Enable,
        HookKind::Disable,
        HookKind::BeforeSetup,
        HookKind::AfterSetup,
    ];

    /// 钩子名，同时也是 hooks.yaml 中的键
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Install => "on_install",
            HookKind::Upgrade => "on_upgrade",
            HookKind::Enable => "on_enable",
            HookKind::Disable => "on_disable",
            HookKind::BeforeSetup => "before_setup",
            HookKind::AfterSetup => "after_setup",
        }
    }

    /// 由钩子名解析
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模块生命周期钩子
///
/// 所有方法都有不执行任何操作的默认实现，模块只需覆盖关心的钩子。
/// 返回错误或 panic 都会被调用方捕获并记录，不会中断其他模块。
///
/// # 示例
///
/// ```rust
/// use chips_modules::module::hooks::{HookProvider, HookStatus};
/// use chips_modules::module::ModuleDescriptor;
///
/// struct BlogHooks;
///
/// impl HookProvider for BlogHooks {
///     fn on_install(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
///         // 创建数据表等
///         Ok(HookStatus::Ran)
///     }
/// }
/// ```
pub trait HookProvider: Send + Sync {
    /// 首次安装
    fn on_install(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }

    /// 从 `from` 升级到当前声明的版本
    fn on_upgrade(&self, _module: &ModuleDescriptor, _from: &Version) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }

    /// 启用
    fn on_enable(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }

    /// 禁用
    fn on_disable(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }

    /// 每次启动时，在安装/升级之后
    fn before_setup(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }

    /// 每次启动时，全部模块完成 setup 之后
    fn after_setup(&self, _module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        Ok(HookStatus::Skipped)
    }
}

/// 按种类分派钩子调用
pub fn invoke(
    provider: &dyn HookProvider,
    kind: HookKind,
    module: &ModuleDescriptor,
    from: Option<&Version>,
) -> anyhow::Result<HookStatus> {
    match kind {
        HookKind::Install => provider.on_install(module),
        HookKind::Upgrade => {
            let from = from.context("升级钩子缺少原版本")?;
            provider.on_upgrade(module, from)
        }
        HookKind::Enable => provider.on_enable(module),
        HookKind::Disable => provider.on_disable(module),
        HookKind::BeforeSetup => provider.before_setup(module),
        HookKind::AfterSetup => provider.after_setup(module),
    }
}

// ==================== 外部命令钩子 ====================

/// hooks.yaml 中的命令写法
///
/// ```yaml
/// on_install: ./bin/migrate --fresh      # 按空白分割，不经过 shell
/// on_upgrade: [./bin/migrate, --step]    # 参数列表
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    fn into_argv(self) -> Vec<String> {
        match self {
            CommandSpec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandSpec::Argv(argv) => argv,
        }
    }
}

/// 由 hooks.yaml 定义的外部命令钩子
///
/// 命令在模块目录中执行，环境变量：
/// `MODULE_ID`、`MODULE_VERSION`、`MODULE_PATH`，升级时另有 `MODULE_FROM_VERSION`。
/// 退出码非零视为失败。
#[derive(Debug, Clone)]
pub struct CommandHooks {
    source: PathBuf,
    commands: BTreeMap<HookKind, Vec<String>>,
}

impl CommandHooks {
    /// 从 hooks.yaml 解析
    ///
    /// # 错误
    ///
    /// 文件无法读取、格式错误、包含未知钩子名或空命令时返回 `InvalidDescriptor`。
    pub fn from_file(path: &Path) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidDescriptor {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let raw: BTreeMap<String, CommandSpec> = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
        };

        let mut commands = BTreeMap::new();
        for (name, spec) in raw {
            let kind = HookKind::from_name(&name).ok_or_else(|| invalid(format!("未知的钩子 '{}'", name)))?;
            let argv = spec.into_argv();
            if argv.is_empty() {
                return Err(invalid(format!("钩子 '{}' 的命令为空", name)));
            }
            commands.insert(kind, argv);
        }

        Ok(Self {
            source: path.to_path_buf(),
            commands,
        })
    }

    fn run(
        &self,
        kind: HookKind,
        module: &ModuleDescriptor,
        from: Option<&Version>,
    ) -> anyhow::Result<HookStatus> {
        let Some(argv) = self.commands.get(&kind) else {
            return Ok(HookStatus::Skipped);
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok(HookStatus::Skipped);
        };

        debug!(
            module_id = %module.id,
            hook = %kind,
            program = %program,
            source = %self.source.display(),
            "执行外部命令钩子"
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .env("MODULE_ID", &module.id)
            .env("MODULE_VERSION", module.version.to_string())
            .env("MODULE_PATH", module.location());
        if module.location().is_dir() {
            command.current_dir(module.location());
        }
        if let Some(from) = from {
            command.env("MODULE_FROM_VERSION", from.to_string());
        }

        let status = command
            .status()
            .with_context(|| format!("无法执行钩子命令 '{}'", program))?;
        if !status.success() {
            bail!("钩子命令 '{}' 退出状态 {}", program, status);
        }
        Ok(HookStatus::Ran)
    }
}

impl HookProvider for CommandHooks {
    fn on_install(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        self.run(HookKind::Install, module, None)
    }

    fn on_upgrade(&self, module: &ModuleDescriptor, from: &Version) -> anyhow::Result<HookStatus> {
        self.run(HookKind::Upgrade, module, Some(from))
    }

    fn on_enable(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        self.run(HookKind::Enable, module, None)
    }

    fn on_disable(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        self.run(HookKind::Disable, module, None)
    }

    fn before_setup(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        self.run(HookKind::BeforeSetup, module, None)
    }

    fn after_setup(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
        self.run(HookKind::AfterSetup, module, None)
    }
}

// ==================== HookRegistry ====================

/// 模块 ID 到钩子提供者的映射
///
/// 未注册提供者的模块回退到其目录中的 hooks.yaml。
pub struct HookRegistry {
    providers: HashMap<String, Arc<dyn HookProvider>>,
    hooks_file: String,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.providers.keys().collect();
        ids.sort();
        f.debug_struct("HookRegistry")
            .field("providers", &ids)
            .field("hooks_file", &self.hooks_file)
            .finish()
    }
}

impl HookRegistry {
    /// 创建空的钩子注册表
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            hooks_file: HOOKS_FILENAME.to_string(),
        }
    }

    /// 设置钩子文件名
    pub fn with_hooks_file(mut self, filename: &str) -> Self {
        self.hooks_file = filename.to_string();
        self
    }

    /// 为模块注册钩子提供者，替换已有的提供者
    pub fn register(&mut self, module_id: impl Into<String>, provider: Arc<dyn HookProvider>) {
        let module_id = module_id.into();
        debug!(module_id = %module_id, "注册钩子提供者");
        self.providers.insert(module_id, provider);
    }

    /// 是否为模块注册了提供者
    pub fn contains(&self, module_id: &str) -> bool {
        self.providers.contains_key(module_id)
    }

    /// 查找模块的钩子提供者
    ///
    /// 返回 `Ok(None)` 表示模块没有任何钩子。
    ///
    /// # 错误
    ///
    /// hooks.yaml 存在但无效时返回 `InvalidDescriptor`。
    pub fn provider_for(&self, module: &ModuleDescriptor) -> Result<Option<Arc<dyn HookProvider>>> {
        if let Some(provider) = self.providers.get(&module.id) {
            return Ok(Some(Arc::clone(provider)));
        }

        let path = module.location().join(&self.hooks_file);
        if module.location().as_os_str().is_empty() || !path.is_file() {
            return Ok(None);
        }

        let hooks = CommandHooks::from_file(&path)?;
        Ok(Some(Arc::new(hooks)))
    }
}
