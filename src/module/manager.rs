//! 模块管理器
//!
//! 组合注册表、生命周期管理器和加载器，提供统一的启动流程：
//!
//! 1. 加载注册表（缓存或扫描 + 依赖解析）
//! 2. 执行安装/升级和 `before_setup` 钩子
//! 3. 按加载顺序激活模块
//! 4. 执行 `after_setup` 钩子

use std::sync::Arc;

use tracing::info;

use super::hooks::{HookProvider, HookRegistry};
use super::lifecycle::{LifecycleManager, SetupReport};
use super::loader::{CapabilityContainer, ModuleLoader};
use super::registry::ModuleRegistry;
use crate::core::config::ModuleConfig;
use crate::utils::Result;

/// 启动结果
pub struct Boot<'r, C: CapabilityContainer> {
    /// 已完成立即加载的加载器，延迟模块仍可通过它触发
    pub loader: ModuleLoader<'r, C>,
    /// 钩子执行报告（含 `after_setup` 的失败）
    pub report: SetupReport,
}

/// 模块管理器
pub struct ModuleManager {
    /// 模块注册表
    registry: ModuleRegistry,

    /// 生命周期管理器
    lifecycle: LifecycleManager,
}

impl ModuleManager {
    /// 创建模块管理器
    pub fn new(registry: ModuleRegistry, lifecycle: LifecycleManager) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    /// 从模块配置创建
    pub fn from_config(config: &ModuleConfig) -> Self {
        Self::with_hooks(config, HookRegistry::new())
    }

    /// 从模块配置创建，并使用给定的钩子注册表
    pub fn with_hooks(config: &ModuleConfig, hooks: HookRegistry) -> Self {
        Self::new(
            ModuleRegistry::from_config(config),
            LifecycleManager::from_config(config, hooks),
        )
    }

    /// 为模块注册钩子提供者
    pub fn register_hooks(&mut self, module_id: impl Into<String>, provider: Arc<dyn HookProvider>) {
        self.lifecycle.hooks_mut().register(module_id, provider);
    }

    /// 加载注册表并执行安装/升级和 `before_setup` 钩子
    ///
    /// # 错误
    ///
    /// 依赖图的致命错误，或生命周期状态无法保存。
    pub fn setup(&mut self) -> Result<SetupReport> {
        self.registry.load()?;
        let report = self.lifecycle.run_setup_hooks(&self.registry)?;

        info!(
            installed = report.installed.len(),
            upgraded = report.upgraded.len(),
            failed = report.failed.len(),
            "模块 setup 完成"
        );
        Ok(report)
    }

    /// 完整启动：setup、激活模块、`after_setup`
    pub fn boot<C: CapabilityContainer>(&mut self, container: C) -> Result<Boot<'_, C>> {
        let mut report = self.setup()?;

        let mut loader = ModuleLoader::new(&self.registry, container);
        loader.load()?;

        report
            .failed
            .extend(self.lifecycle.run_after_setup_hooks(&self.registry));

        info!(
            loaded = loader.loaded_modules().len(),
            deferred = loader.deferred_modules().len(),
            "模块启动完成"
        );
        Ok(Boot { loader, report })
    }

    /// 启用模块并执行 `on_enable`
    ///
    /// 返回 `Ok(false)` 表示模块不存在。模块已启用时不执行钩子。
    pub fn enable(&mut self, module_id: &str) -> Result<bool> {
        let changed = self.will_change(module_id, true)?;
        if !self.registry.enable(module_id)? {
            return Ok(false);
        }
        if changed {
            self.lifecycle.run_enable_hook(&self.registry, module_id);
        }
        Ok(true)
    }

    /// 禁用模块并执行 `on_disable`
    ///
    /// 返回 `Ok(false)` 表示模块不存在。
    pub fn disable(&mut self, module_id: &str) -> Result<bool> {
        let changed = self.will_change(module_id, false)?;
        if !self.registry.disable(module_id)? {
            return Ok(false);
        }
        if changed {
            self.lifecycle.run_disable_hook(&self.registry, module_id);
        }
        Ok(true)
    }

    /// 模块存在且启用状态与目标不同
    fn will_change(&mut self, module_id: &str, enabled: bool) -> Result<bool> {
        self.registry.load()?;
        Ok(self
            .registry
            .get(module_id)
            .is_some_and(|module| module.enabled != enabled))
    }

    /// 基于当前注册表创建加载器
    pub fn loader<C: CapabilityContainer>(&self, container: C) -> ModuleLoader<'_, C> {
        ModuleLoader::new(&self.registry, container)
    }

    /// 模块注册表
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// 可变模块注册表
    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// 生命周期管理器
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::hooks::HookStatus;
    use crate::module::loader::InMemoryContainer;
    use crate::module::metadata::{LoadState, ModuleDescriptor};
    use crate::module::version::Version;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl HookProvider for Calls {
        fn on_install(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
            self.0.lock().unwrap().push(format!("install:{}", module.id));
            Ok(HookStatus::Ran)
        }

        fn on_disable(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
            self.0.lock().unwrap().push(format!("disable:{}", module.id));
            Ok(HookStatus::Ran)
        }

        fn after_setup(&self, module: &ModuleDescriptor) -> anyhow::Result<HookStatus> {
            self.0.lock().unwrap().push(format!("after:{}", module.id));
            Ok(HookStatus::Ran)
        }
    }

    fn manager() -> ModuleManager {
        let mut registry = ModuleRegistry::in_memory();
        registry
            .register(ModuleDescriptor::new("users", Version::new(1, 0, 0)).with_provider("users.provider"))
            .unwrap();
        registry
            .register(
                ModuleDescriptor::new("admin", Version::new(1, 0, 0))
                    .with_dependency("users", "*")
                    .lazy_on(["/admin"]),
            )
            .unwrap();
        ModuleManager::new(registry, LifecycleManager::new(HookRegistry::new(), None))
    }

    #[test]
    fn test_boot() {
        let calls = Arc::new(Calls::default());
        let mut manager = manager();
        manager.register_hooks("users", Arc::clone(&calls) as Arc<dyn HookProvider>);

        let boot = manager.boot(InMemoryContainer::new()).unwrap();

        assert!(boot.report.is_clean());
        assert_eq!(boot.report.installed, vec!["users", "admin"]);
        assert_eq!(boot.loader.state("users"), LoadState::Loaded);
        assert_eq!(boot.loader.state("admin"), LoadState::Deferred);
        assert_eq!(
            *calls.0.lock().unwrap(),
            vec!["install:users", "after:users"]
        );
    }

    #[test]
    fn test_disable_runs_hook() {
        let calls = Arc::new(Calls::default());
        let mut manager = manager();
        manager.register_hooks("admin", Arc::clone(&calls) as Arc<dyn HookProvider>);
        manager.setup().unwrap();

        assert!(manager.disable("admin").unwrap());
        assert!(!manager.registry().is_enabled("admin"));
        assert!(calls.0.lock().unwrap().contains(&"disable:admin".to_string()));

        assert!(!manager.disable("ghost").unwrap());

        // 已禁用时不重复执行钩子
        assert!(manager.disable("admin").unwrap());
        let disables = calls
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == "disable:admin")
            .count();
        assert_eq!(disables, 1);
    }

    #[test]
    fn test_loader_from_manager() {
        let mut manager = manager();
        manager.setup().unwrap();

        let mut loader = manager.loader(InMemoryContainer::new());
        loader.load().unwrap();
        assert_eq!(loader.load_for_route("/admin").unwrap(), vec!["admin"]);
    }
}
