//! 持久化缓存
//!
//! 注册表快照和生命周期状态都以 JSON 整文件形式保存在缓存目录中，
//! 读写通过 [`CacheStore`] 抽象完成。缓存不可读、损坏或格式版本不符时
//! 一律视为不存在，由调用方重建。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::module::dependency::MissingOptional;
use crate::module::discovery::Fingerprint;
use crate::module::metadata::ModuleDescriptor;
use crate::utils::Result;

/// 注册表缓存文件名
pub const REGISTRY_CACHE_FILENAME: &str = "modules.cache.json";

/// 生命周期状态文件名
pub const LIFECYCLE_STATE_FILENAME: &str = "module_state.json";

/// 注册表缓存格式版本
pub const CACHE_SCHEMA: u32 = 1;

/// 缓存存储
///
/// 只负责原始文本的读写，序列化由 [`read_json`] / [`write_json`] 处理。
pub trait CacheStore: Send + Sync {
    /// 读取缓存内容，不存在时返回 `Ok(None)`
    fn read(&self) -> Result<Option<String>>;

    /// 覆盖写入缓存内容
    fn write(&self, contents: &str) -> Result<()>;

    /// 删除缓存
    fn invalidate(&self) -> Result<()>;

    /// 用于日志的描述
    fn describe(&self) -> String;
}

/// JSON 文件缓存
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// 创建文件缓存
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 在目录中创建指定文件名的缓存
    pub fn in_dir(dir: &Path, filename: &str) -> Self {
        Self::new(dir.join(filename))
    }

    /// 缓存文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonFileStore {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// 内存缓存，用于测试和关闭磁盘缓存的场景
#[derive(Debug, Default)]
pub struct MemoryStore {
    contents: Mutex<Option<String>>,
}

impl MemoryStore {
    /// 创建空的内存缓存
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.contents.lock().map(|c| c.clone()).unwrap_or_default())
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Ok(mut guard) = self.contents.lock() {
            *guard = Some(contents.to_string());
        }
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        if let Ok(mut guard) = self.contents.lock() {
            *guard = None;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// 读取并反序列化缓存
///
/// 缓存缺失、无法读取或内容损坏时返回 `None`。
pub fn read_json<T: DeserializeOwned>(store: &dyn CacheStore) -> Option<T> {
    let contents = match store.read() {
        Ok(Some(contents)) => contents,
        Ok(None) => {
            debug!(cache = %store.describe(), "缓存不存在");
            return None;
        }
        Err(e) => {
            warn!(cache = %store.describe(), error = %e, "读取缓存失败");
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(cache = %store.describe(), error = %e, "缓存内容无效");
            None
        }
    }
}

/// 序列化并写入缓存
pub fn write_json<T: Serialize>(store: &dyn CacheStore, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    store.write(&contents)
}

/// 注册表快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCache {
    /// 格式版本
    pub schema: u32,
    /// 生成快照时的发现源指纹
    pub fingerprint: Fingerprint,
    /// 全部模块描述（含禁用模块）
    pub descriptors: Vec<ModuleDescriptor>,
    /// 已解析的加载顺序
    pub load_order: Vec<String>,
    /// 不可用的可选依赖
    #[serde(default)]
    pub missing_optional: Vec<MissingOptional>,
    /// 生成时间
    pub generated_at: DateTime<Utc>,
}

impl RegistryCache {
    /// 创建当前格式版本的快照
    pub fn new(
        fingerprint: Fingerprint,
        descriptors: Vec<ModuleDescriptor>,
        load_order: Vec<String>,
        missing_optional: Vec<MissingOptional>,
    ) -> Self {
        Self {
            schema: CACHE_SCHEMA,
            fingerprint,
            descriptors,
            load_order,
            missing_optional,
            generated_at: Utc::now(),
        }
    }

    /// 快照是否可用于给定指纹
    pub fn is_fresh(&self, fingerprint: &Fingerprint) -> bool {
        self.schema == CACHE_SCHEMA && &self.fingerprint == fingerprint
    }
}
