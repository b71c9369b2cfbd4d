//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，用于诊断（依赖、被依赖、卸载顺序）
//! - [`DependencyResolver`] - 依赖解析器，校验依赖、版本和冲突并计算加载顺序
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::dependency::resolve;
//! use chips_modules::module::{ModuleDescriptor, Version};
//!
//! let modules = vec![
//!     ModuleDescriptor::new("blog", Version::new(1, 0, 0)).with_dependency("users", "^1.0"),
//!     ModuleDescriptor::new("users", Version::new(1, 4, 0)),
//! ];
//!
//! let resolution = resolve(&modules).unwrap();
//! assert_eq!(resolution.load_order, vec!["users", "blog"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::module::constraint::VersionConstraint;
use crate::module::metadata::ModuleDescriptor;
use crate::utils::{CoreError, Result};

// ==================== DependencyGraph ====================

/// 模块依赖关系图
///
/// 节点和边都按模块 ID 有序存储，遍历结果对相同输入保持确定。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// 正向边：模块 ID -> 该模块依赖的模块
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块 ID -> 依赖该模块的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点到图中
    ///
    /// 如果模块已存在，则不会重复添加。
    pub fn add_module(&mut self, module_id: &str) {
        self.edges.entry(module_id.to_string()).or_default();
        self.reverse_edges.entry(module_id.to_string()).or_default();
    }

    /// 添加依赖关系
    ///
    /// 表示 `module_id` 依赖于 `dependency_id`。如果模块不存在，会自动添加。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_modules::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("blog", "users");
    ///
    /// assert_eq!(graph.get_dependencies("blog"), vec!["users".to_string()]);
    /// assert_eq!(graph.get_dependents("users"), vec!["blog".to_string()]);
    /// ```
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        if let Some(deps) = self.edges.get_mut(module_id) {
            deps.insert(dependency_id.to_string());
        }
        if let Some(rev_deps) = self.reverse_edges.get_mut(dependency_id) {
            rev_deps.insert(module_id.to_string());
        }
    }

    /// 获取模块的直接依赖列表
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 获取直接依赖该模块的模块列表
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 获取模块的所有传递依赖，依赖在前
    pub fn get_all_dependencies(&self, module_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        self.collect_dependencies(module_id, &mut result, &mut visited);
        result
    }

    fn collect_dependencies(
        &self,
        module_id: &str,
        result: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) {
        if !visited.insert(module_id.to_string()) {
            return;
        }

        if let Some(deps) = self.edges.get(module_id) {
            for dep in deps {
                self.collect_dependencies(dep, result, visited);
                if !result.contains(dep) {
                    result.push(dep.clone());
                }
            }
        }
    }

    /// 获取所有直接或间接依赖该模块的模块
    pub fn get_all_dependents(&self, module_id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::from([module_id]);
        let mut visited: HashSet<&str> = HashSet::from([module_id]);

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.reverse_edges.get(current) {
                for dependent in dependents {
                    if visited.insert(dependent.as_str()) {
                        result.push(dependent.clone());
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        result
    }

    /// 查找循环依赖路径
    ///
    /// 如果存在循环，返回闭合的路径（首尾相同）；否则返回 `None`。
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }

        None
    }

    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if rec_stack.contains(node) {
            let cycle_start = path.iter().position(|n| n == node)?;
            let mut cycle: Vec<String> = path[cycle_start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }

        if !visited.insert(node.to_string()) {
            return None;
        }

        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// 拓扑排序（Kahn 算法）
    ///
    /// 依赖在依赖方之前；同一层内按模块 ID 排序。
    ///
    /// # 错误
    ///
    /// 存在循环依赖时返回 `CoreError::CircularDependency`，指出闭合环的边。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            let len = cycle.len();
            return Err(CoreError::CircularDependency {
                module_a: cycle[len - 2].clone(),
                module_b: cycle[len - 1].clone(),
            });
        }

        // 入度为该模块依赖的模块数量，依赖全部输出后才能输出自身
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            result.push(node.to_string());

            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// 获取卸载顺序（依赖方在前）
    pub fn get_unload_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 检查是否包含指定模块
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }
}

// ==================== Resolution ====================

/// 可选依赖不可用的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingReason {
    /// 模块不存在
    Absent,
    /// 模块已禁用
    Disabled,
    /// 版本不满足约束
    Incompatible {
        /// 实际版本
        actual: String,
    },
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingReason::Absent => write!(f, "不存在"),
            MissingReason::Disabled => write!(f, "已禁用"),
            MissingReason::Incompatible { actual } => write!(f, "版本 {} 不满足约束", actual),
        }
    }
}

/// 不可用的可选依赖
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingOptional {
    /// 声明方模块
    pub module: String,
    /// 可选依赖模块
    pub dependency: String,
    /// 声明的约束
    pub constraint: String,
    /// 原因
    pub reason: MissingReason,
}

/// 依赖解析结果
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 加载顺序：对每条依赖边 `A -> B`，`B` 排在 `A` 之前
    pub load_order: Vec<String>,
    /// 不可用的可选依赖，由调用方记录
    pub missing_optional: Vec<MissingOptional>,
    /// 已启用模块的依赖图
    pub graph: DependencyGraph,
}

// ==================== DependencyResolver ====================

/// 依赖解析器
///
/// 只在已启用的模块上计算加载顺序；禁用模块对依赖方而言等同于不存在。
pub struct DependencyResolver<'a> {
    modules: BTreeMap<&'a str, &'a ModuleDescriptor>,
}

impl<'a> DependencyResolver<'a> {
    /// 创建解析器
    ///
    /// # 错误
    ///
    /// 输入中存在重复 ID 时返回 `DuplicateModule`。
    pub fn new(descriptors: &'a [ModuleDescriptor]) -> Result<Self> {
        let mut modules: BTreeMap<&'a str, &'a ModuleDescriptor> = BTreeMap::new();
        for descriptor in descriptors {
            if let Some(existing) = modules.insert(descriptor.id.as_str(), descriptor) {
                return Err(CoreError::DuplicateModule {
                    id: descriptor.id.clone(),
                    existing: existing.location.clone(),
                    duplicate: descriptor.location.clone(),
                });
            }
        }
        Ok(Self { modules })
    }

    /// 查找已启用的模块
    fn enabled(&self, module_id: &str) -> Option<&'a ModuleDescriptor> {
        self.modules.get(module_id).copied().filter(|d| d.enabled)
    }

    fn enabled_modules(&self) -> impl Iterator<Item = &'a ModuleDescriptor> + '_ {
        self.modules.values().copied().filter(|d| d.enabled)
    }

    /// 解析所有已启用模块
    ///
    /// 先检查冲突，再按模块 ID 顺序深度优先解析依赖。
    ///
    /// # 错误
    ///
    /// - `ConflictDetected` - 两个已启用模块冲突
    /// - `MissingDependency` - 必需依赖不存在或已禁用
    /// - `VersionMismatch` - 依赖版本不满足约束
    /// - `CircularDependency` - 存在循环依赖
    /// - `InvalidConstraint` - 约束表达式无效
    pub fn resolve(&self) -> Result<Resolution> {
        self.check_conflicts()?;

        let mut load_order = Vec::new();
        let mut resolved = HashSet::new();
        let mut in_progress = HashSet::new();

        for descriptor in self.enabled_modules() {
            self.resolve_recursive(descriptor, &mut load_order, &mut resolved, &mut in_progress)?;
        }

        let missing_optional = self.collect_missing_optional(&load_order)?;
        let graph = self.build_dependency_graph(&load_order);

        debug!(
            modules = load_order.len(),
            missing_optional = missing_optional.len(),
            "依赖解析完成"
        );

        Ok(Resolution {
            load_order,
            missing_optional,
            graph,
        })
    }

    fn resolve_recursive(
        &self,
        descriptor: &'a ModuleDescriptor,
        load_order: &mut Vec<String>,
        resolved: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
    ) -> Result<()> {
        let module_id = descriptor.id.as_str();
        if resolved.contains(module_id) {
            return Ok(());
        }

        in_progress.insert(module_id);

        for (dep_id, constraint) in &descriptor.dependencies {
            let dependency =
                self.enabled(dep_id)
                    .ok_or_else(|| CoreError::MissingDependency {
                        module: module_id.to_string(),
                        dependency: dep_id.clone(),
                    })?;

            self.check_version_compatibility(module_id, dependency, constraint)?;

            if in_progress.contains(dependency.id.as_str()) {
                return Err(CoreError::CircularDependency {
                    module_a: module_id.to_string(),
                    module_b: dep_id.clone(),
                });
            }

            self.resolve_recursive(dependency, load_order, resolved, in_progress)?;
        }

        in_progress.remove(module_id);
        resolved.insert(module_id);
        load_order.push(module_id.to_string());

        Ok(())
    }

    /// 检查版本兼容性
    fn check_version_compatibility(
        &self,
        module_id: &str,
        dependency: &ModuleDescriptor,
        constraint: &str,
    ) -> Result<()> {
        let req = VersionConstraint::parse(constraint)?;
        if !req.matches(&dependency.version) {
            return Err(CoreError::VersionMismatch {
                module: module_id.to_string(),
                dependency: dependency.id.clone(),
                constraint: constraint.to_string(),
                actual: dependency.version.to_string(),
            });
        }
        Ok(())
    }

    /// 检查模块冲突
    ///
    /// 任一方声明的冲突约束被另一方的版本满足时即为冲突，与声明方向无关。
    pub fn check_conflicts(&self) -> Result<()> {
        for descriptor in self.enabled_modules() {
            for (other_id, constraint) in &descriptor.conflicts {
                let Some(other) = self.enabled(other_id) else {
                    continue;
                };
                if VersionConstraint::parse(constraint)?.matches(&other.version) {
                    return Err(CoreError::ConflictDetected {
                        module_a: descriptor.id.clone(),
                        module_b: other.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn collect_missing_optional(&self, load_order: &[String]) -> Result<Vec<MissingOptional>> {
        let mut missing = Vec::new();

        for module_id in load_order {
            let Some(descriptor) = self.modules.get(module_id.as_str()) else {
                continue;
            };

            for (dep_id, constraint) in &descriptor.optional_dependencies {
                let req = VersionConstraint::parse(constraint)?;
                let reason = match self.modules.get(dep_id.as_str()) {
                    None => MissingReason::Absent,
                    Some(dep) if !dep.enabled => MissingReason::Disabled,
                    Some(dep) if !req.matches(&dep.version) => MissingReason::Incompatible {
                        actual: dep.version.to_string(),
                    },
                    Some(_) => continue,
                };

                missing.push(MissingOptional {
                    module: module_id.clone(),
                    dependency: dep_id.clone(),
                    constraint: constraint.clone(),
                    reason,
                });
            }
        }

        Ok(missing)
    }

    /// 构建已解析模块的依赖图（只包含必需依赖边）
    pub fn build_dependency_graph(&self, load_order: &[String]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();

        for module_id in load_order {
            graph.add_module(module_id);
            if let Some(descriptor) = self.modules.get(module_id.as_str()) {
                for dep_id in descriptor.dependencies.keys() {
                    graph.add_dependency(module_id, dep_id);
                }
            }
        }

        graph
    }
}

/// 解析一组模块描述
pub fn resolve(descriptors: &[ModuleDescriptor]) -> Result<Resolution> {
    DependencyResolver::new(descriptors)?.resolve()
}
