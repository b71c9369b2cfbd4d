//! 生命周期管理器
//!
//! 记录每个模块最近一次安装的版本，并据此驱动安装、升级、启用、禁用和
//! 启动前后的钩子。钩子失败只记录日志，不会中断对其他模块的处理。

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::{read_json, write_json, CacheStore, JsonFileStore, LIFECYCLE_STATE_FILENAME};
use super::hooks::{invoke, HookKind, HookRegistry, HookStatus};
use super::metadata::ModuleDescriptor;
use super::registry::ModuleRegistry;
use super::version::Version;
use crate::core::config::ModuleConfig;
use crate::utils::Result;

// ==================== 持久化状态 ====================

/// 已安装模块的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledModule {
    /// 最近一次安装或升级到的版本
    pub version: Version,
    /// 最近一次变更时间
    pub updated_at: DateTime<Utc>,
}

/// 生命周期状态：module_id -> 已安装版本
///
/// 首次运行时为空；记录从不自动删除。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    #[serde(default)]
    modules: BTreeMap<String, InstalledModule>,
}

impl LifecycleState {
    /// 创建空状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 模块已安装的版本
    pub fn installed_version(&self, module_id: &str) -> Option<&Version> {
        self.modules.get(module_id).map(|m| &m.version)
    }

    /// 模块的安装记录
    pub fn get(&self, module_id: &str) -> Option<&InstalledModule> {
        self.modules.get(module_id)
    }

    /// 记录模块版本
    pub fn record(&mut self, module_id: &str, version: Version) {
        self.modules.insert(
            module_id.to_string(),
            InstalledModule {
                version,
                updated_at: Utc::now(),
            },
        );
    }

    /// 已记录的模块数量
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// 是否没有任何记录
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 按模块 ID 排序的全部记录
    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstalledModule)> {
        self.modules.iter()
    }
}

// ==================== 执行报告 ====================

/// 钩子执行失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    /// 模块 ID
    pub module_id: String,
    /// 失败的钩子
    pub hook: HookKind,
    /// 错误信息
    pub error: String,
}

/// 版本升级记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    /// 模块 ID
    pub module_id: String,
    /// 原版本
    pub from: Version,
    /// 新版本
    pub to: Version,
}

/// 一次 setup 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// 首次安装的模块
    pub installed: Vec<String>,
    /// 升级的模块
    pub upgraded: Vec<Upgrade>,
    /// 执行失败的钩子
    pub failed: Vec<HookFailure>,
}

impl SetupReport {
    /// 是否所有钩子都成功
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ==================== LifecycleManager ====================

/// 生命周期管理器
///
/// 对注册表中已启用的模块按加载顺序执行钩子，并维护持久化的安装记录。
pub struct LifecycleManager {
    /// 钩子来源
    hooks: HookRegistry,
    /// 状态存储，`None` 时状态只保存在内存中
    store: Option<Box<dyn CacheStore>>,
    /// 内存中的状态（无存储时使用）
    memory: LifecycleState,
}

impl LifecycleManager {
    /// 创建生命周期管理器
    pub fn new(hooks: HookRegistry, store: Option<Box<dyn CacheStore>>) -> Self {
        Self {
            hooks,
            store,
            memory: LifecycleState::new(),
        }
    }

    /// 从模块配置创建，状态保存在缓存目录的 module_state.json
    pub fn from_config(config: &ModuleConfig, hooks: HookRegistry) -> Self {
        let store = JsonFileStore::in_dir(&config.cache_dir, LIFECYCLE_STATE_FILENAME);
        Self::new(hooks.with_hooks_file(&config.hooks_file), Some(Box::new(store)))
    }

    /// 钩子注册表
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// 可变钩子注册表
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// 读取生命周期状态
    ///
    /// 状态文件不存在或损坏时返回空状态。
    pub fn state(&self) -> LifecycleState {
        match self.store.as_deref() {
            Some(store) => match store.read() {
                Ok(Some(_)) => read_json(store).unwrap_or_else(|| {
                    warn!(state = %store.describe(), "生命周期状态文件损坏，按空状态处理");
                    LifecycleState::new()
                }),
                _ => LifecycleState::new(),
            },
            None => self.memory.clone(),
        }
    }

    fn save_state(&mut self, state: LifecycleState) -> Result<()> {
        match self.store.as_deref() {
            Some(store) => write_json(store, &state),
            None => {
                self.memory = state;
                Ok(())
            }
        }
    }

    /// 执行启动钩子
    ///
    /// 对每个已启用模块（按加载顺序）：
    /// 1. 没有安装记录：执行 `on_install`，成功或不存在时记录版本
    /// 2. 声明版本高于记录版本：执行 `on_upgrade(记录版本)`，成功或不存在时记录版本
    /// 3. 执行 `before_setup`
    ///
    /// 全部处理完成后一次性保存状态。
    ///
    /// # 错误
    ///
    /// 只有状态保存失败会返回错误；钩子失败记录在 [`SetupReport::failed`] 中。
    pub fn run_setup_hooks(&mut self, registry: &ModuleRegistry) -> Result<SetupReport> {
        let mut state = self.state();
        let mut report = SetupReport::default();

        for module in registry.enabled() {
            match state.installed_version(&module.id).cloned() {
                None => {
                    if self.run_hook(module, HookKind::Install, None, &mut report).is_some() {
                        info!(module_id = %module.id, version = %module.version, "模块已安装");
                        state.record(&module.id, module.version.clone());
                        report.installed.push(module.id.clone());
                    }
                }
                Some(installed) if module.version > installed => {
                    if self
                        .run_hook(module, HookKind::Upgrade, Some(&installed), &mut report)
                        .is_some()
                    {
                        info!(
                            module_id = %module.id,
                            from = %installed,
                            to = %module.version,
                            "模块已升级"
                        );
                        state.record(&module.id, module.version.clone());
                        report.upgraded.push(Upgrade {
                            module_id: module.id.clone(),
                            from: installed,
                            to: module.version.clone(),
                        });
                    }
                }
                Some(installed) if module.version < installed => {
                    warn!(
                        module_id = %module.id,
                        installed = %installed,
                        declared = %module.version,
                        "声明版本低于已安装版本，不执行降级"
                    );
                }
                Some(_) => {}
            }

            self.run_hook(module, HookKind::BeforeSetup, None, &mut report);
        }

        self.save_state(state)?;

        debug!(
            installed = report.installed.len(),
            upgraded = report.upgraded.len(),
            failed = report.failed.len(),
            "启动钩子执行完成"
        );
        Ok(report)
    }

    /// 对每个已启用模块执行 `after_setup`
    ///
    /// 返回失败的钩子。
    pub fn run_after_setup_hooks(&self, registry: &ModuleRegistry) -> Vec<HookFailure> {
        let mut report = SetupReport::default();
        for module in registry.enabled() {
            self.run_hook(module, HookKind::AfterSetup, None, &mut report);
        }
        report.failed
    }

    /// 执行启用钩子
    ///
    /// 模块不存在、没有钩子或钩子失败时返回 `false`。
    pub fn run_enable_hook(&self, registry: &ModuleRegistry, module_id: &str) -> bool {
        self.run_single(registry, module_id, HookKind::Enable)
    }

    /// 执行禁用钩子
    ///
    /// 模块不存在、没有钩子或钩子失败时返回 `false`。
    pub fn run_disable_hook(&self, registry: &ModuleRegistry, module_id: &str) -> bool {
        self.run_single(registry, module_id, HookKind::Disable)
    }

    fn run_single(&self, registry: &ModuleRegistry, module_id: &str, kind: HookKind) -> bool {
        let Some(module) = registry.get(module_id) else {
            debug!(module_id = %module_id, hook = %kind, "模块不存在，跳过钩子");
            return false;
        };
        let mut report = SetupReport::default();
        matches!(
            self.run_hook(module, kind, None, &mut report),
            Some(HookStatus::Ran)
        )
    }

    /// 执行单个钩子
    ///
    /// 返回 `None` 表示钩子失败（错误或 panic），失败已写入 `report`。
    fn run_hook(
        &self,
        module: &ModuleDescriptor,
        kind: HookKind,
        from: Option<&Version>,
        report: &mut SetupReport,
    ) -> Option<HookStatus> {
        let _span = crate::module_span!(module.id, kind).entered();
        let mut fail = |error: String| {
            crate::log_hook_failure!(module.id, kind, error);
            report.failed.push(HookFailure {
                module_id: module.id.clone(),
                hook: kind,
                error,
            });
        };

        let provider = match self.hooks.provider_for(module) {
            Ok(Some(provider)) => provider,
            Ok(None) => return Some(HookStatus::Skipped),
            Err(e) => {
                fail(e.to_string());
                return None;
            }
        };

        match catch_unwind(AssertUnwindSafe(|| invoke(provider.as_ref(), kind, module, from))) {
            Ok(Ok(status)) => {
                if status.ran() {
                    debug!(module_id = %module.id, hook = %kind, "钩子执行成功");
                }
                Some(status)
            }
            Ok(Err(e)) => {
                fail(format!("{:#}", e));
                None
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "未知 panic".to_string());
                fail(format!("panic: {}", message));
                None
            }
        }
    }
}
