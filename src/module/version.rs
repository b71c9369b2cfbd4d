//! 语义化版本号
//!
//! 提供 [`Version`] 类型：解析 `major.minor.patch[-pre][+build]` 格式的版本字符串，
//! 并定义版本之间的全序关系。
//!
//! # 比较规则
//!
//! - 依次比较 major、minor、patch
//! - 无预发布标签的版本大于同号的预发布版本（`1.0.0-alpha < 1.0.0`）
//! - 预发布标签之间按字典序比较
//! - 构建元数据仅作记录，不参与比较和相等判断
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::version::Version;
//!
//! let a = Version::parse("1.0.0-alpha").unwrap();
//! let b = Version::parse("v1.0.0+build.7").unwrap();
//! assert!(a < b);
//! assert_eq!(b, Version::new(1, 0, 0));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{CoreError, Result};

/// 语义化版本号
#[derive(Debug, Clone, Eq)]
pub struct Version {
    /// 主版本号
    pub major: u64,
    /// 次版本号
    pub minor: u64,
    /// 修订号
    pub patch: u64,
    /// 预发布标签（`-` 之后的部分）
    pub pre_release: Option<String>,
    /// 构建元数据（`+` 之后的部分）
    pub build: Option<String>,
}

impl Version {
    /// 创建不带预发布标签和构建元数据的版本
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
            build: None,
        }
    }

    /// 严格解析版本字符串
    ///
    /// 接受可选的前导 `v`；major、minor、patch 三段都必须存在且为非负整数。
    ///
    /// # 错误
    ///
    /// 格式不符时返回 `CoreError::VersionParse`。
    pub fn parse(text: &str) -> Result<Self> {
        let partial = PartialVersion::parse(text)?;
        match (partial.minor, partial.patch) {
            (Some(_), Some(_)) => Ok(partial.into_version()),
            _ => Err(parse_error(text, "缺少 major.minor.patch 中的某一段")),
        }
    }

    /// 宽松解析：`1` 和 `1.2` 这样的短版本会以 0 补齐缺失的段
    pub fn parse_loose(text: &str) -> Result<Self> {
        Ok(PartialVersion::parse(text)?.into_version())
    }

    /// 是否为预发布版本
    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }

    /// 仅保留 major.minor.patch 三段
    pub fn core(&self) -> Version {
        Version::new(self.major, self.minor, self.patch)
    }
}

impl Default for Version {
    /// 描述文件未声明版本时使用的默认值 `1.0.0`
    fn default() -> Self {
        Version::new(1, 0, 0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for Version {
    // 与 Eq 保持一致：构建元数据不参与
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre_release.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre_release {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // YAML 中 `version: 1.0` 会被解析为浮点数，这里统一按字符串处理
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        let text = match raw {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "版本号必须是字符串，实际为 {:?}",
                    other
                )))
            }
        };
        Version::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// 允许缺省 minor/patch 的版本
///
/// 约束表达式中的操作数（如 `^1.2`、`~1`）需要知道哪些段是显式给出的，
/// 才能计算正确的上界。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartialVersion {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre_release: Option<String>,
    pub build: Option<String>,
}

impl PartialVersion {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err(parse_error(text, "版本号为空"));
        }

        let (body, build) = match body.split_once('+') {
            Some((head, build)) => {
                validate_identifiers(text, build, "构建元数据")?;
                (head, Some(build.to_string()))
            }
            None => (body, None),
        };

        let (numbers, pre_release) = match body.split_once('-') {
            Some((head, pre)) => {
                validate_identifiers(text, pre, "预发布标签")?;
                (head, Some(pre.to_string()))
            }
            None => (body, None),
        };

        let mut parts = numbers.split('.');
        let major = parse_component(text, parts.next())?;
        let minor = parts.next().map(|p| parse_component(text, Some(p))).transpose()?;
        let patch = parts.next().map(|p| parse_component(text, Some(p))).transpose()?;
        if parts.next().is_some() {
            return Err(parse_error(text, "版本号最多包含三段数字"));
        }

        // 预发布标签只能出现在完整的三段版本之后
        if patch.is_none() && (pre_release.is_some() || build.is_some()) {
            return Err(parse_error(text, "预发布标签或构建元数据需要完整的三段版本号"));
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre_release,
            build,
        })
    }

    /// 以 0 补齐缺失段
    pub fn into_version(self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre_release: self.pre_release,
            build: self.build,
        }
    }
}

fn parse_component(input: &str, part: Option<&str>) -> Result<u64> {
    let part = part.unwrap_or_default();
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return Err(parse_error(input, &format!("'{}' 不是非负整数", part)));
    }
    part.parse::<u64>()
        .map_err(|e| parse_error(input, &format!("'{}' 超出范围: {}", part, e)))
}

fn validate_identifiers(input: &str, tag: &str, what: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.split('.').all(|ident| {
            !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(parse_error(input, &format!("{} '{}' 格式无效", what, tag)))
    }
}

fn parse_error(input: &str, reason: &str) -> CoreError {
    CoreError::VersionParse {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
