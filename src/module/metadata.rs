//! 模块描述定义
//!
//! 定义模块描述文件 (module.yaml) 解析后的数据结构，以及模块在加载器中的状态。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::version::Version;

/// 描述的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorSource {
    /// 来自 module.yaml
    Manifest,
    /// 只有旧式标记文件，字段均为默认值
    LegacyMarker,
    /// 通过代码直接注册（内置模块或测试）
    Builtin,
}

impl Default for DescriptorSource {
    fn default() -> Self {
        DescriptorSource::Builtin
    }
}

/// 模块描述
///
/// 模块的身份、版本、模块间关系和能力声明。`id` 是依赖图中边的稳定键。
/// 除 `enabled` 以外的字段在发现之后不再改变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 显示名称
    #[serde(default)]
    pub name: String,

    /// 描述
    #[serde(default)]
    pub description: String,

    /// 模块版本
    #[serde(default)]
    pub version: Version,

    /// 必需依赖：模块 ID -> 版本约束
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// 可选依赖：模块 ID -> 版本约束
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,

    /// 冲突声明：模块 ID -> 版本约束（对方版本满足约束即视为冲突）
    #[serde(default)]
    pub conflicts: BTreeMap<String, String>,

    /// 服务提供者（按声明顺序注册）
    #[serde(default)]
    pub providers: Vec<String>,

    /// 命令（按声明顺序注册）
    #[serde(default)]
    pub commands: Vec<String>,

    /// 是否延迟加载
    #[serde(default)]
    pub lazy: bool,

    /// 触发延迟加载的路由前缀
    #[serde(default)]
    pub route_triggers: BTreeSet<String>,

    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// 模块所在目录
    #[serde(default)]
    pub location: PathBuf,

    /// 描述来源
    #[serde(default)]
    pub source: DescriptorSource,
}

fn default_enabled() -> bool {
    true
}

impl ModuleDescriptor {
    /// 创建只包含身份和版本的描述，其余字段取默认值
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            version,
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            providers: vec![],
            commands: vec![],
            lazy: false,
            route_triggers: BTreeSet::new(),
            enabled: true,
            location: PathBuf::new(),
            source: DescriptorSource::Builtin,
        }
    }

    /// 为只有旧式标记文件的模块合成最小描述
    pub fn legacy(id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        let mut descriptor = Self::new(id, Version::default());
        descriptor.location = location.into();
        descriptor.source = DescriptorSource::LegacyMarker;
        descriptor
    }

    /// 添加必需依赖
    pub fn with_dependency(mut self, id: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependencies.insert(id.into(), constraint.into());
        self
    }

    /// 添加可选依赖
    pub fn with_optional_dependency(
        mut self,
        id: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        self.optional_dependencies.insert(id.into(), constraint.into());
        self
    }

    /// 添加冲突声明
    pub fn with_conflict(mut self, id: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.conflicts.insert(id.into(), constraint.into());
        self
    }

    /// 添加服务提供者
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.providers.push(provider.into());
        self
    }

    /// 添加命令
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// 设置为延迟加载并声明触发路由
    pub fn lazy_on<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lazy = true;
        self.route_triggers.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// 设置为禁用
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 设置模块目录
    pub fn at(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    /// 模块目录
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// 旧式标记文件名（不含扩展名）
    pub fn legacy_marker_name(&self) -> String {
        legacy_marker_name(&self.id)
    }
}

/// 由模块 ID 得到旧式标记文件名：`blog-posts` -> `BlogPostsModule`
pub fn legacy_marker_name(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 6);
    for word in id.split(|c: char| c == '-' || c == '_' || c == '.') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name.push_str("Module");
    name
}

/// 模块加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// 未加载
    Unloaded,
    /// 延迟加载，等待触发
    Deferred,
    /// 已加载（能力已注册）
    Loaded,
}

impl Default for LoadState {
    fn default() -> Self {
        LoadState::Unloaded
    }
}

impl LoadState {
    /// 是否可以激活
    pub fn can_activate(&self) -> bool {
        matches!(self, LoadState::Unloaded | LoadState::Deferred)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Deferred => write!(f, "deferred"),
            LoadState::Loaded => write!(f, "loaded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = ModuleDescriptor::new("blog", Version::default());

        assert_eq!(descriptor.id, "blog");
        assert_eq!(descriptor.version.to_string(), "1.0.0");
        assert!(descriptor.enabled);
        assert!(!descriptor.lazy);
        assert!(descriptor.dependencies.is_empty());
        assert!(descriptor.providers.is_empty());
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = ModuleDescriptor::new("admin", Version::new(2, 1, 0))
            .with_dependency("users", "^1.0")
            .with_optional_dependency("search", "*")
            .with_conflict("legacy-admin", "*")
            .with_provider("admin.provider")
            .with_command("admin:sync")
            .lazy_on(["/admin"])
            .at("/modules/admin");

        assert_eq!(descriptor.dependencies.get("users").map(String::as_str), Some("^1.0"));
        assert!(descriptor.optional_dependencies.contains_key("search"));
        assert!(descriptor.conflicts.contains_key("legacy-admin"));
        assert_eq!(descriptor.providers, vec!["admin.provider"]);
        assert_eq!(descriptor.commands, vec!["admin:sync"]);
        assert!(descriptor.lazy);
        assert!(descriptor.route_triggers.contains("/admin"));
        assert_eq!(descriptor.location(), Path::new("/modules/admin"));
    }

    #[test]
    fn test_legacy_descriptor() {
        let descriptor = ModuleDescriptor::legacy("blog", "/modules/blog");
        assert_eq!(descriptor.source, DescriptorSource::LegacyMarker);
        assert_eq!(descriptor.version, Version::new(1, 0, 0));
        assert!(descriptor.enabled);
    }

    #[test]
    fn test_legacy_marker_name() {
        assert_eq!(legacy_marker_name("blog"), "BlogModule");
        assert_eq!(legacy_marker_name("blog-posts"), "BlogPostsModule");
        assert_eq!(legacy_marker_name("user_profile"), "UserProfileModule");
    }

    #[test]
    fn test_load_state() {
        assert!(LoadState::Unloaded.can_activate());
        assert!(LoadState::Deferred.can_activate());
        assert!(!LoadState::Loaded.can_activate());
        assert_eq!(LoadState::default(), LoadState::Unloaded);
        assert_eq!(LoadState::Deferred.to_string(), "deferred");
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = ModuleDescriptor::new("blog", Version::new(1, 2, 3))
            .with_dependency("users", "^1.0")
            .at("/modules/blog");

        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: ModuleDescriptor = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, descriptor);
    }
}
