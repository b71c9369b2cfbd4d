//! 模块注册表
//!
//! 持有全部模块描述和已解析的加载顺序，负责：
//! - 通过缓存或重新扫描加载模块
//! - 启用/禁用模块（回写描述文件后完整重建）
//! - 维护注册表缓存

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::core::config::ModuleConfig;
use crate::module::cache::{
    read_json, write_json, CacheStore, JsonFileStore, RegistryCache, REGISTRY_CACHE_FILENAME,
};
use crate::module::dependency::{DependencyGraph, DependencyResolver, MissingOptional, Resolution};
use crate::module::discovery::{Discovery, Fingerprint};
use crate::module::metadata::{DescriptorSource, ModuleDescriptor};
use crate::module::parser::ModuleParser;
use crate::utils::{CoreError, Result};

/// 模块注册表
pub struct ModuleRegistry {
    /// 模块发现器
    discovery: Discovery,

    /// 注册表缓存，`None` 表示不使用缓存
    cache: Option<Box<dyn CacheStore>>,

    /// 通过代码注册的模块，每次重建时与扫描结果合并
    builtins: Vec<ModuleDescriptor>,

    /// 全部模块（含禁用）：module_id -> ModuleDescriptor
    modules: BTreeMap<String, ModuleDescriptor>,

    /// 已解析的加载顺序
    load_order: Vec<String>,

    /// 不可用的可选依赖
    missing_optional: Vec<MissingOptional>,

    /// 已启用模块的依赖图
    graph: DependencyGraph,

    /// 是否已加载
    loaded: bool,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("sources", &self.discovery.sources())
            .field("cache", &self.cache.as_ref().map(|c| c.describe()))
            .field("modules", &self.modules.len())
            .field("load_order", &self.load_order)
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl ModuleRegistry {
    /// 创建模块注册表
    ///
    /// # 参数
    ///
    /// * `discovery` - 模块发现器
    /// * `cache` - 注册表缓存，传 `None` 则每次加载都重新扫描
    pub fn new(discovery: Discovery, cache: Option<Box<dyn CacheStore>>) -> Self {
        Self {
            discovery,
            cache,
            builtins: Vec::new(),
            modules: BTreeMap::new(),
            load_order: Vec::new(),
            missing_optional: Vec::new(),
            graph: DependencyGraph::new(),
            loaded: false,
        }
    }

    /// 从模块配置创建注册表
    pub fn from_config(config: &ModuleConfig) -> Self {
        let cache: Option<Box<dyn CacheStore>> = if config.use_cache {
            Some(Box::new(JsonFileStore::in_dir(
                &config.cache_dir,
                REGISTRY_CACHE_FILENAME,
            )))
        } else {
            None
        };
        Self::new(Discovery::from_config(config), cache)
    }

    /// 只扫描给定目录、不使用缓存的注册表
    pub fn with_dirs(module_dirs: Vec<PathBuf>) -> Self {
        Self::new(Discovery::new(module_dirs), None)
    }

    /// 不扫描任何目录的注册表，模块全部通过 [`register`](Self::register) 添加
    pub fn in_memory() -> Self {
        Self::with_dirs(Vec::new())
    }

    // ==================== 加载与重建 ====================

    /// 加载注册表
    ///
    /// 缓存有效时直接恢复描述和加载顺序；否则扫描、解析并写入缓存。
    /// 已加载时不做任何事。
    ///
    /// # 错误
    ///
    /// 扫描或依赖解析的致命错误（依赖缺失、循环依赖、版本不匹配、冲突、
    /// 描述文件无效、模块重复）。
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        let fingerprint = self.discovery.fingerprint()?;

        if let Some(cache) = self.read_cache(&fingerprint) {
            self.hydrate(cache)?;
            info!(
                modules = self.modules.len(),
                enabled = self.load_order.len(),
                "从缓存加载模块注册表"
            );
            return Ok(());
        }

        self.build(fingerprint)
    }

    /// 丢弃内存状态和缓存，重新扫描并解析
    pub fn rebuild(&mut self) -> Result<()> {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate() {
                warn!(cache = %cache.describe(), error = %e, "删除注册表缓存失败");
            }
        }
        self.loaded = false;

        let fingerprint = self.discovery.fingerprint()?;
        self.build(fingerprint)
    }

    /// 读取与指纹匹配的缓存
    ///
    /// 存在代码注册的模块时不使用缓存。
    fn read_cache(&self, fingerprint: &Fingerprint) -> Option<RegistryCache> {
        if !self.builtins.is_empty() {
            return None;
        }
        let store = self.cache.as_deref()?;
        let cache: RegistryCache = read_json(store)?;

        if cache.is_fresh(fingerprint) {
            Some(cache)
        } else {
            debug!(cache = %store.describe(), "注册表缓存已过期");
            None
        }
    }

    /// 由缓存恢复状态
    ///
    /// 已不在磁盘上的模块被静默丢弃。
    fn hydrate(&mut self, cache: RegistryCache) -> Result<()> {
        let descriptors: Vec<ModuleDescriptor> = cache
            .descriptors
            .into_iter()
            .filter(|descriptor| {
                let present = self.discovery.still_present(descriptor);
                if !present {
                    debug!(module_id = %descriptor.id, "缓存中的模块已不存在，丢弃");
                }
                present
            })
            .collect();

        let load_order: Vec<String> = cache
            .load_order
            .into_iter()
            .filter(|id| descriptors.iter().any(|d| &d.id == id))
            .collect();

        let graph = DependencyResolver::new(&descriptors)?.build_dependency_graph(&load_order);

        self.missing_optional = cache
            .missing_optional
            .into_iter()
            .filter(|m| load_order.contains(&m.module))
            .collect();
        self.modules = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.id.clone(), descriptor))
            .collect();
        self.load_order = load_order;
        self.graph = graph;
        self.loaded = true;
        Ok(())
    }

    /// 扫描、解析并写入缓存
    fn build(&mut self, fingerprint: Fingerprint) -> Result<()> {
        let mut descriptors = self.discovery.discover()?;
        descriptors.extend(self.builtins.iter().cloned());

        self.install(descriptors)?;
        self.persist(fingerprint);

        info!(
            modules = self.modules.len(),
            enabled = self.load_order.len(),
            "模块注册表已重建"
        );
        Ok(())
    }

    /// 解析给定描述并替换内存状态
    ///
    /// 解析失败时保留原有状态。
    fn install(&mut self, descriptors: Vec<ModuleDescriptor>) -> Result<()> {
        let Resolution {
            load_order,
            missing_optional,
            graph,
        } = DependencyResolver::new(&descriptors)?.resolve()?;

        for missing in &missing_optional {
            info!(
                module_id = %missing.module,
                dependency = %missing.dependency,
                constraint = %missing.constraint,
                reason = %missing.reason,
                "可选依赖不可用"
            );
        }

        self.modules = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.id.clone(), descriptor))
            .collect();
        self.load_order = load_order;
        self.missing_optional = missing_optional;
        self.graph = graph;
        self.loaded = true;
        Ok(())
    }

    /// 写入注册表缓存，失败只记录警告
    fn persist(&self, fingerprint: Fingerprint) {
        if !self.builtins.is_empty() {
            return;
        }
        let Some(store) = self.cache.as_deref() else {
            return;
        };

        let snapshot = RegistryCache::new(
            fingerprint,
            self.modules.values().cloned().collect(),
            self.load_order.clone(),
            self.missing_optional.clone(),
        );
        match write_json(store, &snapshot) {
            Ok(()) => debug!(cache = %store.describe(), "注册表缓存已写入"),
            Err(e) => warn!(cache = %store.describe(), error = %e, "写入注册表缓存失败"),
        }
    }

    // ==================== 注册 ====================

    /// 通过代码注册模块
    ///
    /// 注册的模块在之后每次重建时都会与扫描结果合并。注册表已加载时
    /// 立即重新解析。
    ///
    /// # 错误
    ///
    /// - `DuplicateModule` - 模块 ID 已存在
    /// - `InvalidDescriptor` - 描述校验失败
    /// - 注册表已加载时，重新解析的致命错误
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<()> {
        ModuleParser::validate(&descriptor)?;

        let existing = self
            .modules
            .get(&descriptor.id)
            .or_else(|| self.builtins.iter().find(|d| d.id == descriptor.id));
        if let Some(existing) = existing {
            return Err(CoreError::DuplicateModule {
                id: descriptor.id.clone(),
                existing: existing.location.clone(),
                duplicate: descriptor.location.clone(),
            });
        }

        debug!(module_id = %descriptor.id, version = %descriptor.version, "注册模块");

        if self.loaded {
            let mut descriptors: Vec<ModuleDescriptor> = self.modules.values().cloned().collect();
            descriptors.push(descriptor.clone());
            self.install(descriptors)?;
        }
        self.builtins.push(descriptor);
        Ok(())
    }

    // ==================== 启用/禁用 ====================

    /// 启用模块
    ///
    /// 返回 `Ok(false)` 表示模块不存在。
    pub fn enable(&mut self, module_id: &str) -> Result<bool> {
        self.set_enabled(module_id, true)
    }

    /// 禁用模块
    ///
    /// 返回 `Ok(false)` 表示模块不存在。仍有已启用模块依赖它时，
    /// 重建会返回 `MissingDependency`。
    pub fn disable(&mut self, module_id: &str) -> Result<bool> {
        self.set_enabled(module_id, false)
    }

    fn set_enabled(&mut self, module_id: &str, enabled: bool) -> Result<bool> {
        self.load()?;

        let Some(descriptor) = self.modules.get(module_id) else {
            debug!(module_id = %module_id, "模块不存在，忽略启用状态变更");
            return Ok(false);
        };
        let previous = descriptor.enabled;
        if previous == enabled {
            // 状态未变仍重建，让磁盘上的其他变更生效
            debug!(module_id = %module_id, enabled, "启用状态未变，重建注册表");
            self.rebuild()?;
            return Ok(true);
        }

        self.write_enabled(module_id, enabled)?;
        info!(module_id = %module_id, enabled, "模块启用状态已变更");

        if let Err(e) = self.rebuild() {
            warn!(module_id = %module_id, error = %e, "启用状态变更使依赖图无效，已回滚");
            self.write_enabled(module_id, previous)?;
            self.rebuild()?;
            return Err(e);
        }
        Ok(true)
    }

    fn write_enabled(&mut self, module_id: &str, enabled: bool) -> Result<()> {
        let Some(descriptor) = self.modules.get(module_id) else {
            return Ok(());
        };

        if descriptor.source == DescriptorSource::Builtin {
            if let Some(builtin) = self.builtins.iter_mut().find(|d| d.id == module_id) {
                builtin.enabled = enabled;
            }
            Ok(())
        } else {
            let path = self.discovery.descriptor_path(descriptor.location());
            ModuleParser::write_enabled(&path, module_id, enabled)
        }
    }

    // ==================== 查询 ====================

    /// 已启用模块，按加载顺序
    pub fn enabled(&self) -> Vec<&ModuleDescriptor> {
        self.load_order
            .iter()
            .filter_map(|id| self.modules.get(id))
            .collect()
    }

    /// 获取模块描述
    pub fn get(&self, module_id: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(module_id)
    }

    /// 全部模块（含禁用），按 ID 排序
    pub fn all(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    /// 模块是否存在且已启用
    pub fn is_enabled(&self, module_id: &str) -> bool {
        self.load_order.iter().any(|id| id == module_id)
    }

    /// 已解析的加载顺序
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    /// 不可用的可选依赖
    pub fn missing_optional(&self) -> &[MissingOptional] {
        &self.missing_optional
    }

    /// 已启用模块的依赖图
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 是否已加载
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// 模块数量（含禁用）
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// 模块发现器
    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::cache::MemoryStore;
    use crate::module::parser::DESCRIPTOR_FILENAME;
    use crate::module::version::Version;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_module(root: &Path, dir: &str, yaml: &str) -> PathBuf {
        let module_dir = root.join(dir);
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join(DESCRIPTOR_FILENAME), yaml).unwrap();
        module_dir
    }

    /// 共享同一份内存缓存，便于观察跨实例的缓存行为
    struct SharedStore(Arc<MemoryStore>);

    impl CacheStore for SharedStore {
        fn read(&self) -> Result<Option<String>> {
            self.0.read()
        }
        fn write(&self, contents: &str) -> Result<()> {
            self.0.write(contents)
        }
        fn invalidate(&self) -> Result<()> {
            self.0.invalidate()
        }
        fn describe(&self) -> String {
            self.0.describe()
        }
    }

    fn registry_with_store(root: &Path, store: &Arc<MemoryStore>) -> ModuleRegistry {
        ModuleRegistry::new(
            Discovery::new(vec![root.to_path_buf()]),
            Some(Box::new(SharedStore(Arc::clone(store)))),
        )
    }

    #[test]
    fn test_load_resolves_order() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "dependencies:\n  users: \"^1.0\"\n");
        write_module(root.path(), "users", "version: 1.2.0\n");

        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        registry.load().unwrap();

        assert!(registry.is_loaded());
        assert_eq!(registry.load_order(), ["users", "blog"]);
        let enabled: Vec<&str> = registry.enabled().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(enabled, vec!["users", "blog"]);
    }

    #[test]
    fn test_load_is_idempotent() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "");
        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);

        registry.load().unwrap();
        write_module(root.path(), "users", "");
        registry.load().unwrap();

        // 第二次 load 不重新扫描
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_cache_written_and_reused() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "");
        let store = Arc::new(MemoryStore::new());

        let mut first = registry_with_store(root.path(), &store);
        first.load().unwrap();
        let snapshot: RegistryCache = read_json(store.as_ref()).unwrap();
        assert_eq!(snapshot.load_order, vec!["blog"]);

        let mut second = registry_with_store(root.path(), &store);
        second.load().unwrap();
        assert_eq!(second.load_order(), ["blog"]);
    }

    #[test]
    fn test_corrupt_cache_rebuilds() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "");
        let store = Arc::new(MemoryStore::new());
        store.write("garbage").unwrap();

        let mut registry = registry_with_store(root.path(), &store);
        registry.load().unwrap();

        assert_eq!(registry.load_order(), ["blog"]);
        assert!(read_json::<RegistryCache>(store.as_ref()).is_some());
    }

    #[test]
    fn test_cached_module_removed_is_dropped() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "");
        let users = write_module(root.path(), "users", "");
        let store = Arc::new(MemoryStore::new());

        let mut first = registry_with_store(root.path(), &store);
        first.load().unwrap();

        // 伪造一个与当前目录匹配的指纹，让缓存被命中，再删除 users
        std::fs::remove_file(users.join(DESCRIPTOR_FILENAME)).unwrap();
        let mut snapshot: RegistryCache = read_json(store.as_ref()).unwrap();
        snapshot.fingerprint = first.discovery().fingerprint().unwrap();
        write_json(store.as_ref(), &snapshot).unwrap();

        let mut second = registry_with_store(root.path(), &store);
        second.load().unwrap();

        assert_eq!(second.load_order(), ["blog"]);
        assert!(second.get("users").is_none());
    }

    #[test]
    fn test_disable_and_enable() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "");
        write_module(root.path(), "users", "");
        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        registry.load().unwrap();

        assert!(registry.disable("blog").unwrap());
        assert_eq!(registry.load_order(), ["users"]);
        assert!(!registry.get("blog").unwrap().enabled);

        assert!(registry.enable("blog").unwrap());
        assert_eq!(registry.load_order(), ["blog", "users"]);
    }

    #[test]
    fn test_toggle_to_current_state_rebuilds() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "enabled: false\n");
        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        registry.load().unwrap();
        assert!(registry.load_order().is_empty());

        write_module(root.path(), "users", "");
        assert!(registry.disable("blog").unwrap());

        assert!(!registry.get("blog").unwrap().enabled);
        assert!(registry.get("users").is_some());
        assert_eq!(registry.load_order(), ["users"]);
    }

    #[test]
    fn test_disable_persists_to_descriptor() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "version: 2.0.0\n");

        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        registry.disable("blog").unwrap();

        let mut fresh = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        fresh.load().unwrap();
        let blog = fresh.get("blog").unwrap();
        assert!(!blog.enabled);
        assert_eq!(blog.version, Version::new(2, 0, 0));
    }

    #[test]
    fn test_disable_legacy_module_creates_descriptor() {
        let root = TempDir::new().unwrap();
        let module_dir = root.path().join("blog");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("BlogModule.rs"), "").unwrap();

        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        assert!(registry.disable("blog").unwrap());

        assert!(module_dir.join(DESCRIPTOR_FILENAME).is_file());
        assert!(!registry.get("blog").unwrap().enabled);
    }

    #[test]
    fn test_unknown_module_toggle() {
        let mut registry = ModuleRegistry::in_memory();
        assert!(!registry.enable("ghost").unwrap());
        assert!(!registry.disable("ghost").unwrap());
    }

    #[test]
    fn test_disable_dependency_is_fatal() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "blog", "dependencies: [users]\n");
        write_module(root.path(), "users", "");
        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);

        let err = registry.disable("users").unwrap_err();
        assert!(matches!(err, CoreError::MissingDependency { .. }));

        // 变更已回滚
        assert!(registry.is_enabled("users"));
        let mut fresh = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        fresh.load().unwrap();
        assert_eq!(fresh.load_order(), ["users", "blog"]);
    }

    #[test]
    fn test_register_builtin() {
        let mut registry = ModuleRegistry::in_memory();
        registry
            .register(ModuleDescriptor::new("users", Version::new(1, 0, 0)))
            .unwrap();
        registry
            .register(ModuleDescriptor::new("blog", Version::new(1, 0, 0)).with_dependency("users", "*"))
            .unwrap();
        registry.load().unwrap();

        assert_eq!(registry.load_order(), ["users", "blog"]);

        let err = registry
            .register(ModuleDescriptor::new("blog", Version::new(2, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateModule { .. }));
    }

    #[test]
    fn test_register_after_load_resolves() {
        let mut registry = ModuleRegistry::in_memory();
        registry.load().unwrap();

        registry
            .register(ModuleDescriptor::new("users", Version::new(1, 0, 0)))
            .unwrap();
        assert_eq!(registry.load_order(), ["users"]);

        registry.disable("users").unwrap();
        assert!(registry.load_order().is_empty());
        assert!(!registry.is_enabled("users"));
    }

    #[test]
    fn test_failed_resolution_propagates() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "a", "dependencies: [b]\n");
        write_module(root.path(), "b", "dependencies: [a]\n");

        let mut registry = ModuleRegistry::with_dirs(vec![root.path().to_path_buf()]);
        assert!(matches!(
            registry.load(),
            Err(CoreError::CircularDependency { .. })
        ));
        assert!(!registry.is_loaded());
    }
}
