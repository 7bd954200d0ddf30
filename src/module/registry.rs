//! 模块注册表
//!
//! 维护已注册模块的实例和元数据快照，并提供依赖查询与解析入口。
//! 注册表只做簿记，不做生命周期管理；依赖者检查由容器在卸载前调用。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::module::contract::Module;
use crate::module::dependency::{DependencyGraph, DependencyResolution};
use crate::module::metadata::ModuleMetadata;
use crate::utils::{CoreError, Result};

/// 注册表内部记录
struct RegisteredModule {
    module: Arc<dyn Module>,
    metadata: ModuleMetadata,
}

/// 注册表内部状态
struct RegistryState {
    /// 模块 ID -> 注册记录
    modules: HashMap<String, RegisteredModule>,

    /// 注册顺序（保证遍历和依赖解析的确定性）
    order: Vec<String>,
}

/// 模块注册表
#[derive(Clone)]
pub struct ModuleRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                modules: HashMap::new(),
                order: Vec::new(),
            })),
        }
    }

    /// 注册模块
    ///
    /// 注册时采集一份不可变的元数据快照并做校验。
    ///
    /// # Errors
    ///
    /// - `CoreError::ModuleAlreadyRegistered`: ID 已存在
    /// - `CoreError::InvalidMetadata` / `CoreError::VersionParse`: 元数据非法
    #[instrument(skip(self, module), fields(module_id = %module.id()))]
    pub async fn register(&self, module: Arc<dyn Module>) -> Result<()> {
        let metadata = ModuleMetadata::new(
            module.id(),
            module.name(),
            module.version(),
            module.dependencies(),
        );
        metadata.validate()?;

        let mut state = self.state.write().await;
        if state.modules.contains_key(&metadata.id) {
            return Err(CoreError::ModuleAlreadyRegistered(metadata.id));
        }

        let id = metadata.id.clone();
        state.order.push(id.clone());
        state.modules.insert(id.clone(), RegisteredModule { module, metadata });

        debug!(module_id = %id, "模块注册成功");
        Ok(())
    }

    /// 注销模块
    ///
    /// 幂等操作：ID 未注册时返回 `false`。依赖者检查由调用方负责。
    pub async fn unregister(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        if state.modules.remove(id).is_none() {
            return false;
        }
        state.order.retain(|x| x != id);
        debug!(module_id = %id, "模块注销成功");
        true
    }

    /// 获取模块实例
    pub async fn get(&self, id: &str) -> Option<Arc<dyn Module>> {
        let state = self.state.read().await;
        state.modules.get(id).map(|r| r.module.clone())
    }

    /// 模块是否已注册
    pub async fn has(&self, id: &str) -> bool {
        let state = self.state.read().await;
        state.modules.contains_key(id)
    }

    /// 按注册顺序列出全部模块 ID
    pub async fn list(&self) -> Vec<String> {
        let state = self.state.read().await;
        state.order.clone()
    }

    /// 已注册模块数量
    pub async fn count(&self) -> usize {
        let state = self.state.read().await;
        state.modules.len()
    }

    /// 获取单个模块的元数据快照
    pub async fn get_metadata(&self, id: &str) -> Option<ModuleMetadata> {
        let state = self.state.read().await;
        state.modules.get(id).map(|r| r.metadata.clone())
    }

    /// 按注册顺序获取全部元数据快照
    pub async fn all_metadata(&self) -> Vec<ModuleMetadata> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.modules.get(id).map(|r| r.metadata.clone()))
            .collect()
    }

    /// 模块声明的直接依赖（未注册的 ID 返回空列表）
    pub async fn dependencies_of(&self, id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .modules
            .get(id)
            .map(|r| r.metadata.dependencies.clone())
            .unwrap_or_default()
    }

    /// 模块的传递依赖闭包（深度优先，去重）
    pub async fn all_dependencies_of(&self, id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut result: Vec<String> = Vec::new();
        let mut stack: Vec<String> = state
            .modules
            .get(id)
            .map(|r| r.metadata.dependencies.iter().rev().cloned().collect())
            .unwrap_or_default();

        while let Some(dep) = stack.pop() {
            if result.contains(&dep) {
                continue;
            }
            if let Some(record) = state.modules.get(&dep) {
                for next in record.metadata.dependencies.iter().rev() {
                    stack.push(next.clone());
                }
            }
            result.push(dep);
        }
        result
    }

    /// 依赖于指定模块的已注册模块（按注册顺序）
    pub async fn dependents_of(&self, id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter(|candidate| {
                state
                    .modules
                    .get(candidate.as_str())
                    .map(|r| r.metadata.dependencies.iter().any(|d| d == id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// 检查一批待注册模块的依赖缺口
    ///
    /// 返回既不在注册表中、也不在候选集合内的依赖 ID（去重，保持出现顺序）。
    pub async fn check_missing_dependencies(
        &self,
        candidates: &[ModuleMetadata],
    ) -> Vec<String> {
        let state = self.state.read().await;
        let mut missing: Vec<String> = Vec::new();
        for candidate in candidates {
            for dep in &candidate.dependencies {
                let satisfied = state.modules.contains_key(dep)
                    || candidates.iter().any(|c| &c.id == dep);
                if !satisfied && !missing.contains(dep) {
                    missing.push(dep.clone());
                }
            }
        }
        missing
    }

    /// 解析一组模块的依赖，产出加载顺序或循环路径
    ///
    /// # Errors
    ///
    /// 请求的 ID 中有未注册者时返回 `CoreError::ModuleNotFound`
    #[instrument(skip(self))]
    pub async fn resolve_dependencies(&self, ids: &[String]) -> Result<DependencyResolution> {
        let state = self.state.read().await;

        for id in ids {
            if !state.modules.contains_key(id) {
                return Err(CoreError::ModuleNotFound(id.clone()));
            }
        }

        let graph = DependencyGraph::build(ids, |id| {
            state
                .modules
                .get(id)
                .map(|r| r.metadata.dependencies.clone())
                .unwrap_or_default()
        });

        Ok(graph.resolve())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
