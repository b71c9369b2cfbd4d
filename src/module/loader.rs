//! 模块加载器
//!
//! 按注册表的加载顺序激活模块能力（服务提供者、命令）。
//!
//! # 加载状态
//!
//! - 立即加载：`Unloaded -> Loaded`
//! - 延迟加载：`Unloaded -> Deferred -> Loaded`，由路由前缀或显式调用触发
//!
//! 激活一个模块前总是先激活它的依赖。

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use super::metadata::{LoadState, ModuleDescriptor};
use super::registry::ModuleRegistry;
use crate::utils::{CoreError, Result};

/// 能力容器
///
/// 接收模块声明的服务提供者。容器本身（依赖注入、服务构造）不属于本引擎。
pub trait CapabilityContainer {
    /// 注册模块的一个服务提供者
    fn register_provider(&mut self, module_id: &str, provider: &str) -> Result<()>;
}

/// 按顺序记录注册的内存容器
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryContainer {
    registrations: Vec<(String, String)>,
}

impl InMemoryContainer {
    /// 创建空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部注册，`(module_id, provider)`，按注册顺序
    pub fn registrations(&self) -> &[(String, String)] {
        &self.registrations
    }

    /// 全部服务提供者，按注册顺序
    pub fn providers(&self) -> Vec<&str> {
        self.registrations.iter().map(|(_, p)| p.as_str()).collect()
    }

    /// 某个模块注册的服务提供者
    pub fn providers_of(&self, module_id: &str) -> Vec<&str> {
        self.registrations
            .iter()
            .filter(|(id, _)| id == module_id)
            .map(|(_, p)| p.as_str())
            .collect()
    }
}

impl CapabilityContainer for InMemoryContainer {
    fn register_provider(&mut self, module_id: &str, provider: &str) -> Result<()> {
        self.registrations
            .push((module_id.to_string(), provider.to_string()));
        Ok(())
    }
}

/// 模块加载器
pub struct ModuleLoader<'r, C: CapabilityContainer> {
    /// 提供加载顺序和模块描述的注册表
    registry: &'r ModuleRegistry,

    /// 能力容器
    container: C,

    /// 模块状态：module_id -> LoadState
    states: HashMap<String, LoadState>,

    /// 激活顺序
    activated: Vec<String>,

    /// 路由前缀 -> 延迟模块
    routes: BTreeMap<String, Vec<String>>,

    /// 全局命令列表
    commands: Vec<String>,

    /// 命令已收集的模块
    commands_collected: HashSet<String>,
}

impl<'r, C: CapabilityContainer> ModuleLoader<'r, C> {
    /// 创建加载器
    pub fn new(registry: &'r ModuleRegistry, container: C) -> Self {
        Self {
            registry,
            container,
            states: HashMap::new(),
            activated: Vec::new(),
            routes: BTreeMap::new(),
            commands: Vec::new(),
            commands_collected: HashSet::new(),
        }
    }

    /// 按加载顺序处理所有已启用模块
    ///
    /// 延迟模块只记录路由前缀和命令；其他模块立即激活。可重复调用。
    pub fn load(&mut self) -> Result<()> {
        let registry = self.registry;

        for module in registry.enabled() {
            if module.lazy {
                self.defer(module);
            } else {
                self.load_module(&module.id)?;
            }
        }

        info!(
            loaded = self.activated.len(),
            deferred = self.deferred_modules().len(),
            commands = self.commands.len(),
            "模块加载完成"
        );
        Ok(())
    }

    fn defer(&mut self, module: &ModuleDescriptor) {
        // 已延迟或已加载的模块不重复登记路由
        if self.state(&module.id) != LoadState::Unloaded {
            return;
        }

        for prefix in &module.route_triggers {
            self.routes
                .entry(prefix.clone())
                .or_default()
                .push(module.id.clone());
        }
        self.collect_commands(module);
        self.states.insert(module.id.clone(), LoadState::Deferred);

        debug!(
            module_id = %module.id,
            routes = ?module.route_triggers,
            "模块延迟加载"
        );
    }

    fn collect_commands(&mut self, module: &ModuleDescriptor) {
        if self.commands_collected.insert(module.id.clone()) {
            self.commands.extend(module.commands.iter().cloned());
        }
    }

    /// 激活模块
    ///
    /// 先激活缺失的依赖，再向容器注册服务提供者并收集命令。已加载时不做任何事。
    ///
    /// # 错误
    ///
    /// - `ModuleNotFound` - 模块不存在或未启用
    /// - `ModuleLoadFailed` - 容器拒绝注册
    pub fn load_module(&mut self, module_id: &str) -> Result<()> {
        if !self.state(module_id).can_activate() {
            return Ok(());
        }

        let registry = self.registry;
        let module = registry
            .get(module_id)
            .filter(|_| registry.is_enabled(module_id))
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        for dep_id in module.dependencies.keys() {
            self.load_module(dep_id)?;
        }

        for provider in &module.providers {
            self.container
                .register_provider(module_id, provider)
                .map_err(|e| CoreError::ModuleLoadFailed {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                })?;
        }
        self.collect_commands(module);

        self.states.insert(module_id.to_string(), LoadState::Loaded);
        self.activated.push(module_id.to_string());

        info!(
            module_id = %module_id,
            providers = module.providers.len(),
            "模块已激活"
        );
        Ok(())
    }

    /// 按请求路径激活延迟模块
    ///
    /// 路径以某个前缀开头，或等于去掉末尾 `/` 的前缀时，该前缀下的模块被激活。
    /// 返回本次新激活的模块。
    pub fn load_for_route(&mut self, path: &str) -> Result<Vec<String>> {
        let triggered: Vec<String> = self
            .routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()) || path == prefix.trim_end_matches('/'))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect();

        let mut activated = Vec::new();
        for module_id in triggered {
            if self.state(&module_id) == LoadState::Deferred && self.load_deferred(&module_id)? {
                debug!(module_id = %module_id, route = %path, "路由触发延迟模块");
                activated.push(module_id);
            }
        }
        Ok(activated)
    }

    /// 激活延迟模块
    ///
    /// 已加载返回 `true`；不是已知的延迟模块返回 `false`；否则激活后返回 `true`。
    pub fn load_deferred(&mut self, module_id: &str) -> Result<bool> {
        match self.state(module_id) {
            LoadState::Loaded => Ok(true),
            LoadState::Deferred => {
                self.load_module(module_id)?;
                Ok(true)
            }
            LoadState::Unloaded => Ok(false),
        }
    }

    /// 模块的加载状态
    pub fn state(&self, module_id: &str) -> LoadState {
        self.states.get(module_id).copied().unwrap_or_default()
    }

    /// 已激活的模块，按激活顺序
    pub fn loaded_modules(&self) -> &[String] {
        &self.activated
    }

    /// 等待触发的延迟模块，按 ID 排序
    pub fn deferred_modules(&self) -> Vec<&str> {
        let mut deferred: Vec<&str> = self
            .states
            .iter()
            .filter(|(_, state)| **state == LoadState::Deferred)
            .map(|(id, _)| id.as_str())
            .collect();
        deferred.sort_unstable();
        deferred
    }

    /// 全局命令列表
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// 路由前缀 -> 延迟模块
    pub fn routes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.routes
    }

    /// 能力容器
    pub fn container(&self) -> &C {
        &self.container
    }

    /// 取回能力容器
    pub fn into_container(self) -> C {
        self.container
    }
}
