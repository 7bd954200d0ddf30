//! 依赖解析
//!
//! 在模块依赖图上做环检测和拓扑排序，产出依赖优先的加载顺序。

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// 依赖解析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyResolution {
    /// 依赖优先的加载顺序（存在循环依赖时为空）
    pub load_order: Vec<String>,

    /// 是否检测到循环依赖
    pub has_circular_dependency: bool,

    /// 循环路径列表，每条形如 `[a, b, a]`（首尾为同一节点）
    pub circular_paths: Vec<Vec<String>>,
}

impl DependencyResolution {
    /// 构造无环的解析结果
    fn ordered(load_order: Vec<String>) -> Self {
        Self {
            load_order,
            has_circular_dependency: false,
            circular_paths: Vec::new(),
        }
    }

    /// 构造含环的解析结果
    fn cyclic(circular_paths: Vec<Vec<String>>) -> Self {
        Self {
            load_order: Vec::new(),
            has_circular_dependency: true,
            circular_paths,
        }
    }
}

/// 模块依赖图
///
/// 节点按发现顺序记录，保证解析结果对固定的注册顺序是确定的。
pub(crate) struct DependencyGraph {
    /// 节点发现顺序
    nodes: Vec<String>,

    /// 节点 -> 直接依赖（仅保留图内节点）
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 从请求的根节点集出发，沿依赖声明展开传递闭包
    ///
    /// `lookup` 返回某个 ID 的直接依赖；闭包按 FIFO 发现顺序展开。
    pub(crate) fn build<F>(roots: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut nodes: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();

        let mut frontier: VecDeque<String> = VecDeque::new();
        for root in roots {
            if seen.insert(root.clone()) {
                frontier.push_back(root.clone());
            }
        }

        while let Some(id) = frontier.pop_front() {
            let deps = lookup(&id);
            for dep in &deps {
                if seen.insert(dep.clone()) {
                    frontier.push_back(dep.clone());
                }
            }
            nodes.push(id.clone());
            edges.insert(id, deps);
        }

        Self { nodes, edges }
    }

    /// 解析依赖图
    ///
    /// 先做环检测；发现任何环时不再排序，直接返回全部循环路径。
    /// 无环时用 Kahn 算法产出依赖优先的加载顺序。
    pub(crate) fn resolve(&self) -> DependencyResolution {
        let cycles = self.find_cycles();
        if !cycles.is_empty() {
            debug!(cycle_count = cycles.len(), "检测到循环依赖");
            return DependencyResolution::cyclic(cycles);
        }
        DependencyResolution::ordered(self.topological_sort())
    }

    /// 深度优先环检测
    ///
    /// 显式维护递归栈，命中栈内节点即截取当前路径的环片段。
    fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                self.dfs_cycles(node, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn dfs_cycles(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string());
        on_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if !self.edges.contains_key(dep) {
                    continue;
                }
                if on_stack.contains(dep) {
                    // 回边：截取路径中从 dep 开始的片段，补上重复节点收尾
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    cycles.push(cycle);
                } else if !visited.contains(dep) {
                    self.dfs_cycles(dep, visited, on_stack, path, cycles);
                }
            }
        }

        path.pop();
        on_stack.remove(node);
    }

    /// Kahn 拓扑排序
    ///
    /// 入度为零的节点进入 FIFO 边界队列，出队顺序即加载顺序，
    /// 同入度节点按发现顺序先进先出。
    fn topological_sort(&self) -> Vec<String> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for node in &self.nodes {
            let count = self
                .edges
                .get(node)
                .map(|deps| {
                    deps.iter()
                        .filter(|d| self.edges.contains_key(d.as_str()))
                        .count()
                })
                .unwrap_or(0);
            indegree.insert(node.as_str(), count);
        }

        // 依赖 -> 依赖者 的反向邻接表，保持发现顺序
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            if let Some(deps) = self.edges.get(node) {
                for dep in deps {
                    if self.edges.contains_key(dep.as_str()) {
                        dependents
                            .entry(dep.as_str())
                            .or_default()
                            .push(node.as_str());
                    }
                }
            }
        }

        let mut frontier: VecDeque<&str> = self
            .nodes
            .iter()
            .map(|n| n.as_str())
            .filter(|n| indegree[n] == 0)
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(self.nodes.len());
        while let Some(node) = frontier.pop_front() {
            order.push(node.to_string());
            if let Some(list) = dependents.get(node) {
                for dependent in list {
                    if let Some(entry) = indegree.get_mut(dependent) {
                        *entry -= 1;
                        if *entry == 0 {
                            frontier.push_back(dependent);
                        }
                    }
                }
            }
        }

        order
    }
}
