//! 配置加载集成测试
//!
//! 测试配置文件的加载、相对路径解析和配置驱动的注册表

use std::path::PathBuf;

use chips_modules::{CoreConfig, CoreError, ModuleManager};
use tempfile::TempDir;

/// 测试 YAML 配置文件加载
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("modules.yaml");
    tokio::fs::write(
        &config_path,
        r#"
logging:
  level: debug
  json_format: true
modules:
  module_dirs:
    - app/modules
    - /opt/shared-modules
  cache_dir: var/cache
  use_cache: false
dev_mode: true
"#,
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();

    assert_eq!(config.config_path, Some(config_path.clone()));
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert_eq!(
        config.modules.module_dirs,
        vec![
            temp_dir.path().join("app/modules"),
            PathBuf::from("/opt/shared-modules")
        ]
    );
    assert_eq!(config.modules.cache_dir, temp_dir.path().join("var/cache"));
    assert!(!config.modules.use_cache);
    assert_eq!(config.modules.descriptor_file, "module.yaml");
    assert!(config.dev_mode);
}

/// 测试 JSON 配置文件加载
#[tokio::test]
async fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("modules.json");
    tokio::fs::write(
        &config_path,
        r#"{"modules": {"module_dirs": ["mods"], "hooks_file": "lifecycle.yaml"}, "data_dir": "data"}"#,
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();

    assert_eq!(config.modules.module_dirs, vec![temp_dir.path().join("mods")]);
    assert_eq!(config.modules.hooks_file, "lifecycle.yaml");
    assert_eq!(config.data_dir, Some(temp_dir.path().join("data")));
    assert_eq!(config.modules.cache_dir, temp_dir.path().join("data/cache"));
}

/// 测试空配置文件使用默认值
#[tokio::test]
async fn test_empty_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("modules.yaml");
    tokio::fs::write(&config_path, "").await.unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.modules.module_dirs, vec![temp_dir.path().join("modules")]);
    assert!(config.modules.use_cache);
}

/// 测试错误的配置
#[tokio::test]
async fn test_invalid_configs() {
    let temp_dir = TempDir::new().unwrap();

    let missing = CoreConfig::from_file(temp_dir.path().join("missing.yaml")).await;
    assert!(matches!(missing, Err(CoreError::ConfigLoadFailed(_))));

    let malformed_path = temp_dir.path().join("bad.yaml");
    tokio::fs::write(&malformed_path, "modules: [not, a, map]").await.unwrap();
    assert!(matches!(
        CoreConfig::from_file(&malformed_path).await,
        Err(CoreError::Yaml(_))
    ));

    let invalid_path = temp_dir.path().join("invalid.yaml");
    tokio::fs::write(&invalid_path, "logging:\n  rotation: weekly\n").await.unwrap();
    let err = CoreConfig::from_file(&invalid_path).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfigValue { ref key, .. } if key == "logging.rotation"));
}

/// 测试配置驱动的完整流程：自定义描述文件名与开发模式
#[tokio::test]
async fn test_config_drives_registry() {
    let temp_dir = TempDir::new().unwrap();
    let modules = temp_dir.path().join("modules");
    for (dir, yaml) in [("users", "version: 1.0.0\n"), ("blog", "dependencies: [users]\n")] {
        tokio::fs::create_dir_all(modules.join(dir)).await.unwrap();
        tokio::fs::write(modules.join(dir).join("manifest.yaml"), yaml)
            .await
            .unwrap();
    }

    let config_path = temp_dir.path().join("modules.yaml");
    tokio::fs::write(
        &config_path,
        "modules:\n  descriptor_file: manifest.yaml\ndev_mode: true\n",
    )
    .await
    .unwrap();

    let config = CoreConfig::from_file(&config_path).await.unwrap();
    let modules_config = config.effective_modules();
    assert!(!modules_config.use_cache);

    let mut manager = ModuleManager::from_config(&modules_config);
    manager.setup().unwrap();

    assert_eq!(manager.registry().load_order(), ["users", "blog"]);
    assert!(!temp_dir.path().join("cache").join("modules.cache.json").exists());
}
