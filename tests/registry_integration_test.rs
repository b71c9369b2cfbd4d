//! 模块注册表集成测试
//!
//! 在临时目录中搭建模块树，测试发现、依赖解析、缓存和启用状态的完整流程

use std::path::{Path, PathBuf};

use chips_modules::module::cache::REGISTRY_CACHE_FILENAME;
use chips_modules::module::{DescriptorSource, LoadState, MissingReason};
use chips_modules::{
    CoreConfig, CoreError, InMemoryContainer, ModuleConfig, ModuleLoader, ModuleManager,
    ModuleRegistry, Version,
};
use tempfile::TempDir;

fn write_module(root: &Path, dir: &str, yaml: &str) -> PathBuf {
    let module_dir = root.join(dir);
    std::fs::create_dir_all(&module_dir).unwrap();
    std::fs::write(module_dir.join("module.yaml"), yaml).unwrap();
    module_dir
}

fn module_config(modules: &Path, cache: &Path) -> ModuleConfig {
    CoreConfig::builder()
        .module_dir(modules)
        .cache_dir(cache)
        .build()
        .modules
}

/// 测试 A 依赖 B、B 依赖 C 的加载顺序
#[test]
fn test_chain_resolves_in_dependency_order() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();

    write_module(modules.path(), "a", "version: 1.0.0\ndependencies:\n  b: \"^1.0\"\n");
    write_module(modules.path(), "b", "version: 1.2.0\ndependencies:\n  c: \">=1.0\"\n");
    write_module(modules.path(), "c", "version: 1.0.0\n");

    let mut registry = ModuleRegistry::from_config(&module_config(modules.path(), cache.path()));
    registry.load().unwrap();

    assert_eq!(registry.load_order(), ["c", "b", "a"]);
    assert_eq!(registry.graph().get_all_dependencies("a"), vec!["c", "b"]);
    assert_eq!(registry.graph().get_unload_order().unwrap(), vec!["a", "b", "c"]);
}

/// 测试缓存写入后被第二个实例直接使用
#[test]
fn test_registry_cache_is_reused() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_module(modules.path(), "users", "name: Users\n");
    write_module(modules.path(), "blog", "dependencies: [users]\n");
    let config = module_config(modules.path(), cache.path());

    let mut first = ModuleRegistry::from_config(&config);
    first.load().unwrap();

    let cache_file = cache.path().join(REGISTRY_CACHE_FILENAME);
    assert!(cache_file.is_file());

    // 修改缓存中的显示名称：命中缓存时第二个实例会读到修改后的值
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&cache_file).unwrap()).unwrap();
    for descriptor in json["descriptors"].as_array_mut().unwrap() {
        if descriptor["id"] == "users" {
            descriptor["name"] = serde_json::Value::from("Cached Users");
        }
    }
    std::fs::write(&cache_file, serde_json::to_string(&json).unwrap()).unwrap();

    let mut second = ModuleRegistry::from_config(&config);
    second.load().unwrap();
    assert_eq!(second.get("users").unwrap().name, "Cached Users");
    assert_eq!(second.load_order(), ["users", "blog"]);

    // rebuild 忽略缓存
    second.rebuild().unwrap();
    assert_eq!(second.get("users").unwrap().name, "Users");
}

/// 测试新增模块目录使缓存失效
#[test]
fn test_new_module_invalidates_cache() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_module(modules.path(), "users", "");
    let config = module_config(modules.path(), cache.path());

    ModuleRegistry::from_config(&config).load().unwrap();
    write_module(modules.path(), "blog", "dependencies: [users]\n");

    let mut registry = ModuleRegistry::from_config(&config);
    registry.load().unwrap();
    assert_eq!(registry.load_order(), ["users", "blog"]);
}

/// 测试不使用缓存时不写入缓存文件
#[test]
fn test_cache_disabled() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_module(modules.path(), "users", "");

    let mut config = module_config(modules.path(), cache.path());
    config.use_cache = false;

    ModuleRegistry::from_config(&config).load().unwrap();
    assert!(!cache.path().join(REGISTRY_CACHE_FILENAME).exists());
}

/// 测试致命的依赖错误
#[test]
fn test_fatal_graph_errors() {
    // 缺失依赖
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "blog", "dependencies: [users]\n");
    let err = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()])
        .load()
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::MissingDependency { ref module, ref dependency } if module == "blog" && dependency == "users"
    ));
    assert!(err.is_graph_error());

    // 循环依赖
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "a", "dependencies: [b]\n");
    write_module(modules.path(), "b", "dependencies: [a]\n");
    let err = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()])
        .load()
        .unwrap_err();
    assert!(matches!(err, CoreError::CircularDependency { .. }));

    // 版本不满足
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "blog", "dependencies:\n  users: \"^2.0\"\n");
    write_module(modules.path(), "users", "version: 1.9.9\n");
    let err = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()])
        .load()
        .unwrap_err();
    assert!(matches!(err, CoreError::VersionMismatch { ref actual, .. } if actual == "1.9.9"));
}

/// 测试 A 与 B>=2.0 冲突，B 为 2.1.0
#[test]
fn test_conflict_detected() {
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "a", "conflicts:\n  b: \">=2.0\"\n");
    write_module(modules.path(), "b", "version: 2.1.0\n");

    let err = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()])
        .load()
        .unwrap_err();
    assert!(matches!(err, CoreError::ConflictDetected { .. }));

    // 冲突方禁用后不再冲突
    let mut registry = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()]);
    std::fs::write(
        modules.path().join("b").join("module.yaml"),
        "version: 2.1.0\nenabled: false\n",
    )
    .unwrap();
    registry.load().unwrap();
    assert_eq!(registry.load_order(), ["a"]);
}

/// 测试可选依赖不可用时不影响解析
#[test]
fn test_optional_dependencies_reported() {
    let modules = TempDir::new().unwrap();
    write_module(
        modules.path(),
        "blog",
        "optional_dependencies:\n  search: \"^1.0\"\n  comments: \"*\"\n  mailer: \"^3\"\n",
    );
    write_module(modules.path(), "comments", "enabled: false\n");
    write_module(modules.path(), "mailer", "version: 2.0.0\n");

    let mut registry = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()]);
    registry.load().unwrap();

    assert_eq!(registry.load_order(), ["blog", "mailer"]);
    let reasons: Vec<(&str, &MissingReason)> = registry
        .missing_optional()
        .iter()
        .map(|m| (m.dependency.as_str(), &m.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("comments", &MissingReason::Disabled),
            (
                "mailer",
                &MissingReason::Incompatible {
                    actual: "2.0.0".to_string()
                }
            ),
            ("search", &MissingReason::Absent),
        ]
    );
}

/// 测试多个模块目录与重复 ID
#[test]
fn test_multiple_sources() {
    let core = TempDir::new().unwrap();
    let vendor = TempDir::new().unwrap();
    write_module(core.path(), "users", "");
    write_module(vendor.path(), "blog", "dependencies: [users]\n");

    let mut registry =
        ModuleRegistry::with_dirs(vec![core.path().to_path_buf(), vendor.path().to_path_buf()]);
    registry.load().unwrap();
    assert_eq!(registry.load_order(), ["users", "blog"]);

    write_module(vendor.path(), "users-copy", "id: users\n");
    let err = ModuleRegistry::with_dirs(vec![core.path().to_path_buf(), vendor.path().to_path_buf()])
        .load()
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateModule { ref id, .. } if id == "users"));
}

/// 测试旧式标记文件模块
#[test]
fn test_legacy_marker_module() {
    let modules = TempDir::new().unwrap();
    let legacy = modules.path().join("blog-posts");
    std::fs::create_dir_all(&legacy).unwrap();
    std::fs::write(legacy.join("BlogPostsModule.php"), "").unwrap();
    std::fs::create_dir_all(modules.path().join("assets")).unwrap();

    let mut registry = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()]);
    registry.load().unwrap();

    let module = registry.get("blog-posts").unwrap();
    assert_eq!(module.source, DescriptorSource::LegacyMarker);
    assert_eq!(module.version, Version::new(1, 0, 0));
    assert!(registry.get("assets").is_none());
}

/// 测试无效描述文件
#[test]
fn test_invalid_descriptor() {
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "blog", "version: not-a-version\n");

    let err = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()])
        .load()
        .unwrap_err();
    match err {
        CoreError::InvalidDescriptor { path, .. } => assert!(path.ends_with("blog/module.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}

/// 测试禁用状态写回描述文件并在新实例中生效
#[test]
fn test_disable_persists_across_instances() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_module(modules.path(), "users", "");
    write_module(modules.path(), "blog", "dependencies: [users]\n");
    let config = module_config(modules.path(), cache.path());

    let mut registry = ModuleRegistry::from_config(&config);
    assert!(registry.disable("blog").unwrap());
    assert_eq!(registry.load_order(), ["users"]);

    let mut fresh = ModuleRegistry::from_config(&config);
    fresh.load().unwrap();
    assert!(!fresh.is_enabled("blog"));
    assert!(!fresh.get("blog").unwrap().enabled);

    assert!(fresh.enable("blog").unwrap());
    assert_eq!(fresh.load_order(), ["users", "blog"]);
}

/// 测试延迟模块在匹配路由时激活
#[test]
fn test_lazy_admin_module_loads_on_route() {
    let modules = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    write_module(
        modules.path(),
        "users",
        "providers: [users.repository]\ncommands: [\"users:create\"]\n",
    );
    write_module(
        modules.path(),
        "admin",
        "dependencies: [users]\nlazy: true\nroute_triggers: [/admin]\nproviders: [admin.panel]\ncommands: [\"admin:publish\"]\n",
    );

    let mut config = module_config(modules.path(), cache.path());
    config.use_cache = false;
    let mut manager = ModuleManager::from_config(&config);
    let mut boot = manager.boot(InMemoryContainer::new()).unwrap();

    assert_eq!(boot.loader.state("users"), LoadState::Loaded);
    assert_eq!(boot.loader.state("admin"), LoadState::Deferred);
    assert_eq!(boot.loader.container().providers(), vec!["users.repository"]);
    // 延迟模块的命令在启动时就已注册
    assert_eq!(boot.loader.commands(), ["users:create", "admin:publish"]);

    assert!(boot.loader.load_for_route("/blog").unwrap().is_empty());
    assert_eq!(boot.loader.load_for_route("/admin/users").unwrap(), vec!["admin"]);
    assert_eq!(boot.loader.state("admin"), LoadState::Loaded);
    assert_eq!(
        boot.loader.container().providers(),
        vec!["users.repository", "admin.panel"]
    );

    // 再次访问不会重复激活
    assert!(boot.loader.load_for_route("/admin").unwrap().is_empty());
    assert_eq!(boot.loader.commands().len(), 2);
}

/// 测试加载器直接激活禁用模块时报错
#[test]
fn test_loader_rejects_disabled_module() {
    let modules = TempDir::new().unwrap();
    write_module(modules.path(), "users", "enabled: false\n");

    let mut registry = ModuleRegistry::with_dirs(vec![modules.path().to_path_buf()]);
    registry.load().unwrap();

    let mut loader = ModuleLoader::new(&registry, InMemoryContainer::new());
    loader.load().unwrap();
    assert!(matches!(
        loader.load_module("users"),
        Err(CoreError::ModuleNotFound(_))
    ));
}
