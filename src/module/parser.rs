//! 模块描述解析器
//!
//! 负责从 module.yaml 解析模块描述、校验描述内容，以及回写 `enabled` 标记。

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::module::constraint::VersionConstraint;
use crate::module::metadata::{DescriptorSource, ModuleDescriptor};
use crate::module::version::Version;
use crate::utils::{CoreError, Result};

/// 默认的模块描述文件名
pub const DESCRIPTOR_FILENAME: &str = "module.yaml";

/// 描述文件的原始结构
///
/// 所有字段都可省略，缺省值在 [`ModuleParser::parse_string`] 中补齐。
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DescriptorFile {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    version: Option<Version>,
    dependencies: ConstraintMap,
    optional_dependencies: ConstraintMap,
    conflicts: ConstraintMap,
    providers: Vec<String>,
    commands: Vec<String>,
    lazy: bool,
    route_triggers: BTreeSet<String>,
    enabled: Option<bool>,
}

/// 依赖声明的两种写法
///
/// ```yaml
/// dependencies:
///   users: "^1.0"
///   auth: 2.1        # 数字会按版本文本处理
///   mailer:          # 空值等同于 "*"
/// ```
///
/// 或只列出模块 ID（约束均为 `*`）：
///
/// ```yaml
/// dependencies: [users, auth]
/// ```
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConstraintMap {
    Map(BTreeMap<String, Value>),
    List(Vec<String>),
}

impl Default for ConstraintMap {
    fn default() -> Self {
        ConstraintMap::List(vec![])
    }
}

impl ConstraintMap {
    fn into_constraints(self, field: &str) -> std::result::Result<BTreeMap<String, String>, String> {
        match self {
            ConstraintMap::List(ids) => Ok(ids.into_iter().map(|id| (id, "*".to_string())).collect()),
            ConstraintMap::Map(entries) => entries
                .into_iter()
                .map(|(id, value)| {
                    let constraint = match value {
                        Value::Null => "*".to_string(),
                        Value::String(text) => text,
                        Value::Number(number) => number.to_string(),
                        other => {
                            return Err(format!(
                                "{} 中 '{}' 的版本约束必须是字符串, 实际为 {:?}",
                                field, id, other
                            ))
                        }
                    };
                    Ok((id, constraint))
                })
                .collect(),
        }
    }
}

/// 模块描述解析器
///
/// 提供从文件或字符串解析 module.yaml 的功能。
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析模块描述
    ///
    /// # 参数
    ///
    /// * `path` - 描述文件路径
    /// * `module_dir` - 模块目录，未声明 `id` 时取其目录名
    ///
    /// # 错误
    ///
    /// 读取、解析或校验失败时返回 `InvalidDescriptor`，错误中包含文件路径。
    pub fn parse_file(path: &Path, module_dir: &Path) -> Result<ModuleDescriptor> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::InvalidDescriptor {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse_string(&content, module_dir).map_err(|e| match e {
            CoreError::InvalidDescriptor { reason, .. } => CoreError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason,
            },
            other => CoreError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }

    /// 从字符串解析模块描述
    ///
    /// 空文档视为所有字段取默认值。
    pub fn parse_string(content: &str, module_dir: &Path) -> Result<ModuleDescriptor> {
        let file: DescriptorFile = if content.trim().is_empty() {
            DescriptorFile::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let invalid = |reason: String| CoreError::InvalidDescriptor {
            path: module_dir.to_path_buf(),
            reason,
        };

        let id = match file.id {
            Some(id) => id,
            None => dir_name(module_dir).ok_or_else(|| invalid("无法从目录名推断模块 ID".to_string()))?,
        };

        let descriptor = ModuleDescriptor {
            name: file.name.unwrap_or_else(|| id.clone()),
            description: file.description.unwrap_or_default(),
            version: file.version.unwrap_or_default(),
            dependencies: file.dependencies.into_constraints("dependencies").map_err(invalid)?,
            optional_dependencies: file
                .optional_dependencies
                .into_constraints("optional_dependencies")
                .map_err(invalid)?,
            conflicts: file.conflicts.into_constraints("conflicts").map_err(invalid)?,
            providers: file.providers,
            commands: file.commands,
            lazy: file.lazy,
            route_triggers: file.route_triggers,
            enabled: file.enabled.unwrap_or(true),
            location: module_dir.to_path_buf(),
            source: DescriptorSource::Manifest,
            id,
        };

        Self::validate(&descriptor)?;
        Ok(descriptor)
    }

    /// 校验模块描述
    ///
    /// 执行以下检查：
    /// - 模块 ID 格式
    /// - 每条依赖、可选依赖、冲突声明的约束语法
    /// - 不允许依赖或冲突自身
    /// - 路由前缀不能为空
    pub fn validate(descriptor: &ModuleDescriptor) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !is_valid_module_id(&descriptor.id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，必须以字母开头，只允许字母、数字、下划线和连字符",
                descriptor.id
            ));
        }

        let declarations = [
            ("dependencies", &descriptor.dependencies),
            ("optional_dependencies", &descriptor.optional_dependencies),
            ("conflicts", &descriptor.conflicts),
        ];
        for (field, entries) in declarations {
            for (id, constraint) in entries {
                if id == &descriptor.id {
                    errors.push(format!("{} 中不能声明模块自身", field));
                }
                if let Err(e) = VersionConstraint::parse(constraint) {
                    errors.push(format!("{} 中 '{}' 的约束无效: {}", field, id, e));
                }
            }
        }

        if descriptor.route_triggers.iter().any(|prefix| prefix.is_empty()) {
            errors.push("route_triggers 中不能包含空前缀".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidDescriptor {
                path: descriptor.location.clone(),
                reason: errors.join("; "),
            })
        }
    }

    /// 回写描述文件中的 `enabled` 标记
    ///
    /// 保留文件中的其他内容。文件不存在时（旧式标记模块）创建只包含
    /// `id` 和 `enabled` 的最小描述文件。
    pub fn write_enabled(path: &Path, module_id: &str, enabled: bool) -> Result<()> {
        let mut document = match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => serde_yaml::from_str::<Value>(&content)?,
            Ok(_) => Value::Mapping(Mapping::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut mapping = Mapping::new();
                mapping.insert(Value::from("id"), Value::from(module_id));
                Value::Mapping(mapping)
            }
            Err(e) => return Err(e.into()),
        };

        let mapping = document.as_mapping_mut().ok_or_else(|| CoreError::InvalidDescriptor {
            path: path.to_path_buf(),
            reason: "描述文件顶层必须是映射".to_string(),
        })?;
        mapping.insert(Value::from("enabled"), Value::from(enabled));

        std::fs::write(path, serde_yaml::to_string(&document)?)?;
        Ok(())
    }
}

/// 检查模块 ID 格式是否有效
///
/// 有效格式：字母开头，只包含字母、数字、下划线和连字符
pub fn is_valid_module_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

fn dir_name(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_descriptor() {
        let yaml = r#"
id: blog
name: "博客"
description: "文章与评论"
version: 1.2.3
dependencies:
  users: "^1.0"
  auth: 2.1
optional_dependencies:
  search:
conflicts:
  legacy-blog: "*"
providers:
  - blog.posts
  - blog.comments
commands:
  - blog:publish
lazy: true
route_triggers:
  - /blog
"#;

        let descriptor = ModuleParser::parse_string(yaml, Path::new("/modules/blog")).unwrap();

        assert_eq!(descriptor.id, "blog");
        assert_eq!(descriptor.name, "博客");
        assert_eq!(descriptor.version, Version::new(1, 2, 3));
        assert_eq!(descriptor.dependencies["users"], "^1.0");
        assert_eq!(descriptor.dependencies["auth"], "2.1");
        assert_eq!(descriptor.optional_dependencies["search"], "*");
        assert_eq!(descriptor.conflicts["legacy-blog"], "*");
        assert_eq!(descriptor.providers, vec!["blog.posts", "blog.comments"]);
        assert_eq!(descriptor.commands, vec!["blog:publish"]);
        assert!(descriptor.lazy);
        assert!(descriptor.route_triggers.contains("/blog"));
        assert!(descriptor.enabled);
        assert_eq!(descriptor.source, DescriptorSource::Manifest);
        assert_eq!(descriptor.location(), Path::new("/modules/blog"));
    }

    #[test]
    fn test_defaults_from_directory() {
        let descriptor = ModuleParser::parse_string("", Path::new("/modules/users")).unwrap();

        assert_eq!(descriptor.id, "users");
        assert_eq!(descriptor.version, Version::new(1, 0, 0));
        assert!(descriptor.enabled);
        assert!(!descriptor.lazy);
        assert!(descriptor.dependencies.is_empty());
    }

    #[test]
    fn test_dependency_list_form() {
        let yaml = "dependencies: [users, auth]\n";
        let descriptor = ModuleParser::parse_string(yaml, Path::new("/modules/blog")).unwrap();

        assert_eq!(descriptor.dependencies.len(), 2);
        assert_eq!(descriptor.dependencies["users"], "*");
    }

    #[test]
    fn test_disabled_descriptor() {
        let descriptor =
            ModuleParser::parse_string("enabled: false\n", Path::new("/modules/blog")).unwrap();
        assert!(!descriptor.enabled);
    }

    #[test]
    fn test_invalid_version() {
        let result = ModuleParser::parse_string("version: 1.x\n", Path::new("/modules/blog"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_constraint() {
        let yaml = "dependencies:\n  users: \">=abc\"\n";
        let err = ModuleParser::parse_string(yaml, Path::new("/modules/blog")).unwrap_err();

        assert!(matches!(err, CoreError::InvalidDescriptor { .. }));
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_huge_constraint_operand_validates() {
        let yaml = "dependencies:\n  users: \"^18446744073709551615.0.0\"\n";
        let descriptor = ModuleParser::parse_string(yaml, Path::new("/modules/blog")).unwrap();
        assert_eq!(descriptor.dependencies["users"], "^18446744073709551615.0.0");
    }

    #[test]
    fn test_invalid_module_id() {
        let err = ModuleParser::parse_string("id: 123-blog\n", Path::new("/modules/blog")).unwrap_err();
        assert!(err.to_string().contains("格式无效"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let yaml = "id: blog\ndependencies:\n  blog: \"*\"\n";
        assert!(ModuleParser::parse_string(yaml, Path::new("/modules/blog")).is_err());
    }

    #[test]
    fn test_parse_file_names_path() {
        let dir = TempDir::new().unwrap();
        let module_dir = dir.path().join("blog");
        std::fs::create_dir(&module_dir).unwrap();
        let path = module_dir.join(DESCRIPTOR_FILENAME);
        std::fs::write(&path, "version: [1, 2]\n").unwrap();

        let err = ModuleParser::parse_file(&path, &module_dir).unwrap_err();
        match err {
            CoreError::InvalidDescriptor { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[test]
    fn test_write_enabled_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DESCRIPTOR_FILENAME);
        std::fs::write(&path, "id: blog\nversion: 2.0.0\nenabled: true\n").unwrap();

        ModuleParser::write_enabled(&path, "blog", false).unwrap();

        let descriptor = ModuleParser::parse_file(&path, dir.path()).unwrap();
        assert_eq!(descriptor.id, "blog");
        assert_eq!(descriptor.version, Version::new(2, 0, 0));
        assert!(!descriptor.enabled);
    }

    #[test]
    fn test_write_enabled_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DESCRIPTOR_FILENAME);

        ModuleParser::write_enabled(&path, "legacy", false).unwrap();

        let descriptor = ModuleParser::parse_file(&path, dir.path()).unwrap();
        assert_eq!(descriptor.id, "legacy");
        assert!(!descriptor.enabled);
    }

    #[test]
    fn test_is_valid_module_id() {
        assert!(is_valid_module_id("blog"));
        assert!(is_valid_module_id("blog-posts_2"));
        assert!(!is_valid_module_id(""));
        assert!(!is_valid_module_id("2blog"));
        assert!(!is_valid_module_id("blog posts"));
    }
}
