//! 模块发现
//!
//! 扫描模块目录，为每个子目录生成模块描述：
//!
//! 1. 存在 `module.yaml` 时解析描述文件
//! 2. 否则查找旧式标记文件 `{Id}Module.*`，合成最小描述
//! 3. 两者都没有的目录静默跳过
//!
//! 同时计算发现源的新鲜度指纹，供注册表判断缓存是否过期。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::ModuleConfig;
use crate::module::metadata::{legacy_marker_name, DescriptorSource, ModuleDescriptor};
use crate::module::parser::{ModuleParser, DESCRIPTOR_FILENAME};
use crate::utils::{CoreError, Result};

/// 发现源指纹
///
/// 由最新修改时间和条目数组成。模块目录、描述文件或标记文件的任何
/// 增删改都会改变其中至少一项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// 发现源目录
    pub sources: Vec<PathBuf>,
    /// 最新修改时间（毫秒）
    pub newest_mtime_ms: u64,
    /// 参与计算的条目数
    pub entries: usize,
}

/// 模块发现器
#[derive(Debug, Clone)]
pub struct Discovery {
    sources: Vec<PathBuf>,
    descriptor_file: String,
}

impl Discovery {
    /// 创建发现器，使用默认描述文件名
    pub fn new(sources: Vec<PathBuf>) -> Self {
        Self {
            sources,
            descriptor_file: DESCRIPTOR_FILENAME.to_string(),
        }
    }

    /// 从模块配置创建发现器
    pub fn from_config(config: &ModuleConfig) -> Self {
        Self::new(config.module_dirs.clone()).with_descriptor_file(&config.descriptor_file)
    }

    /// 设置描述文件名
    pub fn with_descriptor_file(mut self, filename: &str) -> Self {
        self.descriptor_file = filename.to_string();
        self
    }

    /// 发现源目录
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// 模块目录中的描述文件路径
    pub fn descriptor_path(&self, module_dir: &Path) -> PathBuf {
        module_dir.join(&self.descriptor_file)
    }

    /// 扫描所有发现源
    ///
    /// 每个发现源内的模块目录按名称排序访问。不存在的发现源被跳过。
    ///
    /// # 错误
    ///
    /// - 描述文件无效时返回 `InvalidDescriptor`
    /// - 两个目录声明相同的模块 ID 时返回 `DuplicateModule`
    pub fn discover(&self) -> Result<Vec<ModuleDescriptor>> {
        let mut descriptors: Vec<ModuleDescriptor> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for source in &self.sources {
            if !source.is_dir() {
                debug!(source = %source.display(), "模块目录不存在，跳过");
                continue;
            }

            for module_dir in sorted_subdirs(source)? {
                let Some(descriptor) = self.inspect(&module_dir)? else {
                    debug!(path = %module_dir.display(), "目录中没有模块描述，跳过");
                    continue;
                };

                if let Some(existing) = seen.get(&descriptor.id) {
                    return Err(CoreError::DuplicateModule {
                        id: descriptor.id,
                        existing: existing.clone(),
                        duplicate: module_dir,
                    });
                }

                debug!(
                    module_id = %descriptor.id,
                    version = %descriptor.version,
                    source = ?descriptor.source,
                    "发现模块"
                );
                seen.insert(descriptor.id.clone(), module_dir);
                descriptors.push(descriptor);
            }
        }

        info!(count = descriptors.len(), "模块发现完成");
        Ok(descriptors)
    }

    /// 检查单个目录
    ///
    /// 返回 `Ok(None)` 表示目录既没有描述文件也没有旧式标记。
    pub fn inspect(&self, module_dir: &Path) -> Result<Option<ModuleDescriptor>> {
        let descriptor_path = self.descriptor_path(module_dir);
        if descriptor_path.is_file() {
            return ModuleParser::parse_file(&descriptor_path, module_dir).map(Some);
        }

        let Some(id) = module_dir.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        if find_legacy_marker(module_dir, id).is_some() {
            return Ok(Some(ModuleDescriptor::legacy(id, module_dir)));
        }

        Ok(None)
    }

    /// 缓存中的描述是否仍然有效
    ///
    /// 模块目录中仍有描述文件，或（对于旧式模块）仍有标记文件。
    pub fn still_present(&self, descriptor: &ModuleDescriptor) -> bool {
        let dir = descriptor.location();
        if self.descriptor_path(dir).is_file() {
            return true;
        }
        descriptor.source == DescriptorSource::LegacyMarker
            && find_legacy_marker(dir, &descriptor.id).is_some()
    }

    /// 计算发现源指纹
    ///
    /// 覆盖发现源目录、每个模块目录以及其中的描述文件和标记文件。
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let mut newest: u64 = 0;
        let mut entries: usize = 0;
        let mut observe = |path: &Path| {
            entries += 1;
            newest = newest.max(mtime_ms(path));
        };

        for source in &self.sources {
            if !source.is_dir() {
                continue;
            }
            observe(source);

            for module_dir in sorted_subdirs(source)? {
                observe(&module_dir);

                let descriptor_path = self.descriptor_path(&module_dir);
                if descriptor_path.is_file() {
                    observe(&descriptor_path);
                }
                if let Some(id) = module_dir.file_name().and_then(|n| n.to_str()) {
                    if let Some(marker) = find_legacy_marker(&module_dir, id) {
                        observe(&marker);
                    }
                }
            }
        }

        Ok(Fingerprint {
            sources: self.sources.clone(),
            newest_mtime_ms: newest,
            entries,
        })
    }
}

/// 扫描给定目录，使用默认描述文件名
pub fn discover(sources: &[PathBuf]) -> Result<Vec<ModuleDescriptor>> {
    Discovery::new(sources.to_vec()).discover()
}

/// 查找旧式标记文件：文件名主干为 `{Id}Module`
pub fn find_legacy_marker(module_dir: &Path, id: &str) -> Option<PathBuf> {
    let expected = legacy_marker_name(id);
    let entries = match std::fs::read_dir(module_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %module_dir.display(), error = %e, "无法读取模块目录");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(expected.as_str())
        })
}

fn sorted_subdirs(source: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(source)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn mtime_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
