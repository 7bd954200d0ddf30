//! 容器
//!
//! 组合根：持有一个注册表、一个生命周期管理器、一个事件总线和
//! 一份执行上下文，对宿主暴露模块装载与启停的完整 API。
//!
//! 事件总线和外部协作者（资源提供者、共享状态）由宿主在构造时
//! 显式注入，同一进程内可以创建多个互相隔离的容器实例。
//!
//! 并发约定：容器的公开操作不做互斥保护，宿主必须自行串行化
//! 对同一实例的 `load_module`/`unload_module`/`start`/`stop` 调用。

mod state;

pub use state::ContainerState;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::bus::{system_events, EventBus, EventContext};
use crate::context::{ExecutionContext, ResourceProvider, SharedContext, TenantInfo};
use crate::core::config::ContainerConfig;
use crate::module::{
    LifecycleManager, Module, ModuleLifecycleState, ModuleMetadata, ModuleRegistry, ModuleStatus,
};
use crate::utils::{CoreError, Result};

/// 初始化后才存在的内部组件
struct ContainerCore {
    registry: ModuleRegistry,
    lifecycle: LifecycleManager,
    context: Arc<ExecutionContext>,
}

/// 模块容器
pub struct Container {
    config: ContainerConfig,
    state: RwLock<ContainerState>,
    core: RwLock<Option<ContainerCore>>,
    event_bus: Arc<EventBus>,
    resources: Arc<dyn ResourceProvider>,
    shared_context: Arc<dyn SharedContext>,
    event_context: EventContext,
}

impl Container {
    /// 创建容器
    ///
    /// 事件总线与外部协作者由宿主显式传入；容器创建后处于
    /// `uninitialized` 状态，必须先 [`Container::initialize`]。
    pub fn new(
        config: ContainerConfig,
        event_bus: Arc<EventBus>,
        resources: Arc<dyn ResourceProvider>,
        shared_context: Arc<dyn SharedContext>,
    ) -> Self {
        let event_context = EventContext::new(config.blueprint_id.clone(), None);
        Self {
            config,
            state: RwLock::new(ContainerState::Uninitialized),
            core: RwLock::new(None),
            event_bus,
            resources,
            shared_context,
            event_context,
        }
    }

    /// 初始化容器
    ///
    /// 构造全新的注册表、生命周期管理器和执行上下文，
    /// 广播 `container.initialized` 后进入 `ready` 状态。
    #[instrument(skip(self), fields(blueprint_id = %self.config.blueprint_id))]
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.can_initialize() {
                return Err(CoreError::InvalidContainerState {
                    expected: ContainerState::Uninitialized.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = ContainerState::Initializing;
        }

        let result = self.build_core().await;
        match result {
            Ok(core) => {
                *self.core.write().await = Some(core);
                self.emit(system_events::CONTAINER_INITIALIZED, json!({})).await;
                *self.state.write().await = ContainerState::Ready;
                info!(blueprint_id = %self.config.blueprint_id, "容器初始化完成");
                Ok(())
            }
            Err(err) => self.fail_container(err).await,
        }
    }

    async fn build_core(&self) -> Result<ContainerCore> {
        self.config.validate()?;

        let registry = ModuleRegistry::new();
        let lifecycle =
            LifecycleManager::new(self.event_bus.clone(), self.event_context.clone());
        let context = Arc::new(ExecutionContext::new(
            self.config.blueprint_id.clone(),
            self.config.context_type,
            TenantInfo::default(),
            self.event_bus.clone(),
            self.resources.clone(),
            self.shared_context.clone(),
        ));

        Ok(ContainerCore {
            registry,
            lifecycle,
            context,
        })
    }

    /// 加载单个模块
    ///
    /// 依次做重复检查、依赖缺失检查、注册、初始化；容器正在运行时
    /// 加载完成后立即把模块拉到 READY（热加载）。
    #[instrument(skip(self, module), fields(module_id = %module.id()))]
    pub async fn load_module(&self, module: Arc<dyn Module>) -> Result<()> {
        match self.try_load(module.clone()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.emit(
                    system_events::MODULE_ERROR,
                    json!({ "module_id": module.id(), "error": err.to_string() }),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn try_load(&self, module: Arc<dyn Module>) -> Result<()> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
        let id = module.id().to_string();

        if core.registry.has(&id).await {
            return Err(CoreError::ModuleAlreadyRegistered(id));
        }

        let candidate = ModuleMetadata::new(
            module.id(),
            module.name(),
            module.version(),
            module.dependencies(),
        );
        let missing = core
            .registry
            .check_missing_dependencies(std::slice::from_ref(&candidate))
            .await;
        if !missing.is_empty() {
            return Err(CoreError::MissingDependencies {
                module: id,
                missing,
            });
        }

        self.admit(core, module, &id).await
    }

    /// 注册 + 初始化 + 广播 + 热启动
    async fn admit(
        &self,
        core: &ContainerCore,
        module: Arc<dyn Module>,
        id: &str,
    ) -> Result<()> {
        core.registry.register(module.clone()).await?;
        core.lifecycle
            .initialize(module, core.context.clone())
            .await?;

        self.emit(system_events::MODULE_LOADED, json!({ "module_id": id }))
            .await;
        debug!(module_id = %id, "模块加载完成");

        if self.state.read().await.is_running() {
            core.lifecycle.start(id).await?;
            core.lifecycle.ready(id).await?;
            debug!(module_id = %id, "模块热启动完成");
        }

        Ok(())
    }

    /// 批量加载模块
    ///
    /// 依赖缺失检查以整批为候选集，允许批内模块互相依赖；
    /// 随后按传入顺序逐个加载。
    #[instrument(skip(self, modules), fields(count = modules.len()))]
    pub async fn load_modules(&self, modules: Vec<Arc<dyn Module>>) -> Result<()> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;

        let candidates: Vec<ModuleMetadata> = modules
            .iter()
            .map(|m| {
                ModuleMetadata::new(m.id(), m.name(), m.version(), m.dependencies())
            })
            .collect();

        for candidate in &candidates {
            if core.registry.has(&candidate.id).await {
                return Err(CoreError::ModuleAlreadyRegistered(candidate.id.clone()));
            }
        }

        let missing = core.registry.check_missing_dependencies(&candidates).await;
        if !missing.is_empty() {
            return Err(CoreError::MissingDependencies {
                module: candidates
                    .first()
                    .map(|c| c.id.clone())
                    .unwrap_or_default(),
                missing,
            });
        }

        for module in modules {
            let id = module.id().to_string();
            if let Err(err) = self.admit(core, module, &id).await {
                self.emit(
                    system_events::MODULE_ERROR,
                    json!({ "module_id": id, "error": err.to_string() }),
                )
                .await;
                return Err(err);
            }
        }

        Ok(())
    }

    /// 卸载模块
    ///
    /// 仍被其他模块依赖时拒绝卸载并点名依赖者；
    /// 模块处于 READY 时先停止，再释放、注销并广播。
    #[instrument(skip(self))]
    pub async fn unload_module(&self, module_id: &str) -> Result<()> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;

        if !core.registry.has(module_id).await {
            return Err(CoreError::ModuleNotFound(module_id.to_string()));
        }

        let dependents = core.registry.dependents_of(module_id).await;
        if !dependents.is_empty() {
            return Err(CoreError::ModuleHasDependents {
                module: module_id.to_string(),
                dependents,
            });
        }

        if let Ok(state) = core.lifecycle.state_of(module_id).await {
            if state.current_status == ModuleStatus::Ready {
                core.lifecycle.stop(module_id).await?;
            }
        }

        core.lifecycle.dispose(module_id).await?;
        core.registry.unregister(module_id).await;

        self.emit(
            system_events::MODULE_UNLOADED,
            json!({ "module_id": module_id }),
        )
        .await;
        debug!(module_id = %module_id, "模块卸载完成");
        Ok(())
    }

    /// 热重载模块
    ///
    /// 取出同一实例，卸载后重新加载（保持内存中的对象身份，
    /// 不保留模块内部的运行期状态）。
    #[instrument(skip(self))]
    pub async fn reload_module(&self, module_id: &str) -> Result<()> {
        let module = {
            let core = self.core.read().await;
            let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
            core.registry
                .get(module_id)
                .await
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?
        };

        self.unload_module(module_id).await?;
        self.load_module(module).await
    }

    /// 启动容器
    ///
    /// 对全部已注册模块做依赖解析；发现循环依赖时进入 `error`
    /// 状态并点名循环路径。无环时按依赖优先顺序依次把每个模块
    /// 拉到 READY，循环前置 `container.starting`、完成后广播
    /// `container.started`。
    #[instrument(skip(self), fields(blueprint_id = %self.config.blueprint_id))]
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if !state.can_start() {
                return Err(CoreError::InvalidContainerState {
                    expected: ContainerState::Ready.to_string(),
                    actual: state.to_string(),
                });
            }
        }

        let resolution = {
            let core = self.core.read().await;
            let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
            let ids = core.registry.list().await;
            core.registry.resolve_dependencies(&ids).await?
        };

        if resolution.has_circular_dependency {
            return self
                .fail_container(CoreError::CircularDependencies(resolution.circular_paths))
                .await;
        }

        self.emit(
            system_events::CONTAINER_STARTING,
            json!({ "load_order": resolution.load_order }),
        )
        .await;
        *self.state.write().await = ContainerState::Running;

        {
            let core = self.core.read().await;
            let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
            for id in &resolution.load_order {
                if let Err(err) = self.bring_to_ready(core, id).await {
                    // 已就绪的模块保持原状，容器标记为错误
                    return self.fail_container(err).await;
                }
            }
        }

        self.emit(system_events::CONTAINER_STARTED, json!({})).await;
        info!(blueprint_id = %self.config.blueprint_id, "容器启动完成");
        Ok(())
    }

    async fn bring_to_ready(&self, core: &ContainerCore, id: &str) -> Result<()> {
        core.lifecycle.start(id).await?;
        core.lifecycle.ready(id).await?;
        Ok(())
    }

    /// 停止容器
    ///
    /// 收集当前处于 READY 的模块，按就绪顺序的逆序停止。
    #[instrument(skip(self), fields(blueprint_id = %self.config.blueprint_id))]
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.can_stop() {
                return Err(CoreError::InvalidContainerState {
                    expected: ContainerState::Running.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = ContainerState::Stopping;
        }

        self.emit(system_events::CONTAINER_STOPPING, json!({})).await;

        let result = async {
            let core = self.core.read().await;
            let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;

            let mut ready_modules = core.lifecycle.modules_in_state(ModuleStatus::Ready).await;
            ready_modules.reverse();
            for id in &ready_modules {
                core.lifecycle.stop(id).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.emit(system_events::CONTAINER_STOPPED, json!({})).await;
                *self.state.write().await = ContainerState::Stopped;
                info!(blueprint_id = %self.config.blueprint_id, "容器停止完成");
                Ok(())
            }
            Err(err) => self.fail_container(err).await,
        }
    }

    /// 释放容器
    ///
    /// 运行中则先停止；按依赖者在前的顺序卸载全部模块，
    /// 清空共享状态，最终回到 `uninitialized`，可重新初始化。
    /// 中途失败时容器进入 `error` 状态并抛出原始错误。
    #[instrument(skip(self), fields(blueprint_id = %self.config.blueprint_id))]
    pub async fn dispose(&self) -> Result<()> {
        if self.state.read().await.is_running() {
            self.stop().await?;
        }

        let result = self.teardown().await;
        match result {
            Ok(()) => {
                *self.core.write().await = None;
                *self.state.write().await = ContainerState::Uninitialized;
                info!(blueprint_id = %self.config.blueprint_id, "容器已释放");
                Ok(())
            }
            Err(err) => self.fail_container(err).await,
        }
    }

    async fn teardown(&self) -> Result<()> {
        let unload_order = {
            let core = self.core.read().await;
            let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
            let ids = core.registry.list().await;
            if ids.is_empty() {
                Vec::new()
            } else {
                let resolution = core.registry.resolve_dependencies(&ids).await?;
                if resolution.has_circular_dependency {
                    // 环内模块互为依赖者，按注册逆序尝试，让依赖检查自然报错
                    ids.into_iter().rev().collect()
                } else {
                    // 依赖者在前，保证每次卸载都能通过依赖检查
                    resolution.load_order.into_iter().rev().collect()
                }
            }
        };

        for id in &unload_order {
            self.unload_module(id).await?;
        }

        self.shared_context.clear().await?;
        Ok(())
    }

    /// 统一的失败路径：进入 error 状态、广播 `container.error`、抛出原始错误
    async fn fail_container(&self, err: CoreError) -> Result<()> {
        *self.state.write().await = ContainerState::Error;
        warn!(blueprint_id = %self.config.blueprint_id, error = %err, "容器进入错误状态");
        self.emit(
            system_events::CONTAINER_ERROR,
            json!({ "error": err.to_string() }),
        )
        .await;
        Err(err)
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        if let Err(err) = self
            .event_bus
            .emit_with_context(event_type, payload, "container", self.event_context.clone())
            .await
        {
            warn!(event_type = %event_type, error = %err, "容器事件广播失败");
        }
    }

    // ==================== 查询接口 ====================

    /// 当前容器状态
    pub async fn state(&self) -> ContainerState {
        *self.state.read().await
    }

    /// 容器配置
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// 事件总线
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// 按注册顺序列出模块 ID
    pub async fn module_ids(&self) -> Vec<String> {
        match self.core.read().await.as_ref() {
            Some(core) => core.registry.list().await,
            None => Vec::new(),
        }
    }

    /// 已注册模块数量
    pub async fn module_count(&self) -> usize {
        match self.core.read().await.as_ref() {
            Some(core) => core.registry.count().await,
            None => 0,
        }
    }

    /// 获取模块实例
    pub async fn get_module(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        match self.core.read().await.as_ref() {
            Some(core) => core.registry.get(module_id).await,
            None => None,
        }
    }

    /// 获取模块元数据快照
    pub async fn module_metadata(&self, module_id: &str) -> Option<ModuleMetadata> {
        match self.core.read().await.as_ref() {
            Some(core) => core.registry.get_metadata(module_id).await,
            None => None,
        }
    }

    /// 查询模块生命周期状态
    pub async fn module_state(&self, module_id: &str) -> Result<ModuleLifecycleState> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(CoreError::ContainerNotInitialized)?;
        core.lifecycle.state_of(module_id).await
    }
}
