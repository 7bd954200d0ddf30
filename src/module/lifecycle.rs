//! 生命周期管理器
//!
//! 持有每个已加载模块的状态记录，按状态机规则调用模块钩子，
//! 并在每次状态变化后通过事件总线广播。
//!
//! # 失败语义
//!
//! 钩子失败时：错误计数加一，状态置为 ERROR 并广播 `module.error`
//! （携带失败前状态和累计错误次数）；错误计数未达到 3 次时把状态
//! 指针回退到失败前的状态作为尽力而为的恢复（回退不重新调用任何
//! 钩子），最后把原始错误重新抛给调用方。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::bus::{system_events, EventBus, EventContext};
use crate::context::ExecutionContext;
use crate::module::contract::Module;
use crate::module::metadata::ModuleStatus;
use crate::utils::{CoreError, Result};

/// 单个模块的生命周期记录快照
#[derive(Debug, Clone)]
pub struct ModuleLifecycleState {
    /// 模块 ID
    pub module_id: String,

    /// 当前状态
    pub current_status: ModuleStatus,

    /// 上一次稳定状态
    pub previous_status: Option<ModuleStatus>,

    /// 钩子失败累计次数
    pub error_count: u32,
}

/// 内部跟踪记录
struct TrackedModule {
    module: Arc<dyn Module>,
    #[allow(dead_code)]
    context: Arc<ExecutionContext>,
    current: ModuleStatus,
    previous: Option<ModuleStatus>,
    error_count: u32,
}

struct ManagerState {
    records: HashMap<String, TrackedModule>,
    /// 跟踪顺序（遍历按插入顺序）
    order: Vec<String>,
}

/// 生命周期钩子种类
#[derive(Debug, Clone, Copy)]
enum Hook {
    Init,
    Start,
    Ready,
    Stop,
    Dispose,
}

impl Hook {
    fn name(&self) -> &'static str {
        match self {
            Hook::Init => "init",
            Hook::Start => "start",
            Hook::Ready => "ready",
            Hook::Stop => "stop",
            Hook::Dispose => "dispose",
        }
    }

    /// 钩子执行期间的过渡状态（无过渡状态的钩子直接提交终点状态）
    fn transitional_status(&self) -> Option<ModuleStatus> {
        match self {
            Hook::Start => Some(ModuleStatus::Starting),
            Hook::Stop => Some(ModuleStatus::Stopping),
            _ => None,
        }
    }

    /// 钩子成功后提交的状态
    fn committed_status(&self) -> ModuleStatus {
        match self {
            Hook::Init => ModuleStatus::Initialized,
            Hook::Start => ModuleStatus::Started,
            Hook::Ready => ModuleStatus::Ready,
            Hook::Stop => ModuleStatus::Stopped,
            Hook::Dispose => ModuleStatus::Disposed,
        }
    }

    /// 过渡状态对应的事件
    fn transitional_event(&self) -> Option<&'static str> {
        match self {
            Hook::Start => Some(system_events::MODULE_STARTING),
            Hook::Stop => Some(system_events::MODULE_STOPPING),
            _ => None,
        }
    }

    /// 提交状态对应的事件
    fn committed_event(&self) -> &'static str {
        match self {
            Hook::Init => system_events::MODULE_INITIALIZED,
            Hook::Start => system_events::MODULE_STARTED,
            Hook::Ready => system_events::MODULE_READY,
            Hook::Stop => system_events::MODULE_STOPPED,
            Hook::Dispose => system_events::MODULE_DISPOSED,
        }
    }
}

/// 生命周期管理器
#[derive(Clone)]
pub struct LifecycleManager {
    state: Arc<RwLock<ManagerState>>,
    event_bus: Arc<EventBus>,
    event_context: EventContext,
}

impl LifecycleManager {
    /// 创建生命周期管理器
    pub fn new(event_bus: Arc<EventBus>, event_context: EventContext) -> Self {
        Self {
            state: Arc::new(RwLock::new(ManagerState {
                records: HashMap::new(),
                order: Vec::new(),
            })),
            event_bus,
            event_context,
        }
    }

    /// 初始化模块
    ///
    /// 建立跟踪记录并调用 `init` 钩子。
    ///
    /// # Errors
    ///
    /// - `CoreError::ModuleAlreadyInitialized`: 模块已被跟踪
    /// - `CoreError::HookFailed`: init 钩子失败
    #[instrument(skip(self, module, context), fields(module_id = %module.id()))]
    pub async fn initialize(
        &self,
        module: Arc<dyn Module>,
        context: Arc<ExecutionContext>,
    ) -> Result<()> {
        let id = module.id().to_string();

        {
            let mut state = self.state.write().await;
            if state.records.contains_key(&id) {
                return Err(CoreError::ModuleAlreadyInitialized(id));
            }
            module.set_status(ModuleStatus::Uninitialized);
            state.order.push(id.clone());
            state.records.insert(
                id.clone(),
                TrackedModule {
                    module: module.clone(),
                    context: context.clone(),
                    current: ModuleStatus::Uninitialized,
                    previous: None,
                    error_count: 0,
                },
            );
        }

        self.run_hook(&id, Hook::Init, Some(context)).await
    }

    /// 启动模块（INITIALIZED/STOPPED -> STARTING -> STARTED）
    #[instrument(skip(self))]
    pub async fn start(&self, module_id: &str) -> Result<()> {
        self.run_hook(module_id, Hook::Start, None).await
    }

    /// 模块就绪（STARTED -> READY）
    #[instrument(skip(self))]
    pub async fn ready(&self, module_id: &str) -> Result<()> {
        self.run_hook(module_id, Hook::Ready, None).await
    }

    /// 停止模块（READY -> STOPPING -> STOPPED）
    #[instrument(skip(self))]
    pub async fn stop(&self, module_id: &str) -> Result<()> {
        self.run_hook(module_id, Hook::Stop, None).await
    }

    /// 释放模块（STOPPED -> DISPOSED）
    ///
    /// dispose 钩子成功后才移除跟踪记录。
    #[instrument(skip(self))]
    pub async fn dispose(&self, module_id: &str) -> Result<()> {
        self.run_hook(module_id, Hook::Dispose, None).await?;

        let mut state = self.state.write().await;
        state.records.remove(module_id);
        state.order.retain(|x| x != module_id);
        debug!(module_id = %module_id, "模块生命周期记录已移除");
        Ok(())
    }

    /// 查询模块生命周期状态
    ///
    /// # Errors
    ///
    /// 未跟踪的模块 ID 返回 `CoreError::ModuleNotFound`
    pub async fn state_of(&self, module_id: &str) -> Result<ModuleLifecycleState> {
        let state = self.state.read().await;
        let record = state
            .records
            .get(module_id)
            .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

        Ok(ModuleLifecycleState {
            module_id: module_id.to_string(),
            current_status: record.current,
            previous_status: record.previous,
            error_count: record.error_count,
        })
    }

    /// 按插入顺序筛选处于指定状态的模块 ID
    pub async fn modules_in_state(&self, status: ModuleStatus) -> Vec<String> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter(|id| {
                state
                    .records
                    .get(id.as_str())
                    .map(|r| r.current == status)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// 当前跟踪的模块数量
    pub async fn tracked_count(&self) -> usize {
        let state = self.state.read().await;
        state.records.len()
    }

    /// 统一的钩子执行流程
    ///
    /// 校验转换 -> 提交过渡状态 -> 调用钩子 -> 提交终点状态；
    /// 任一步失败走统一的失败路径。
    async fn run_hook(
        &self,
        module_id: &str,
        hook: Hook,
        context: Option<Arc<ExecutionContext>>,
    ) -> Result<()> {
        let target = hook.transitional_status().unwrap_or(hook.committed_status());

        // 阶段一：校验并进入过渡状态
        let module = {
            let mut state = self.state.write().await;
            let record = state
                .records
                .get_mut(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            if !record.current.can_transition(target) {
                return Err(CoreError::InvalidTransition {
                    module: module_id.to_string(),
                    from: record.current.to_string(),
                    to: target.to_string(),
                });
            }

            record.previous = Some(record.current);
            if let Some(transitional) = hook.transitional_status() {
                record.current = transitional;
                record.module.set_status(transitional);
            }
            record.module.clone()
        };

        if let Some(event_type) = hook.transitional_event() {
            self.emit_event(event_type, module_id).await;
        }

        // 阶段二：调用模块钩子
        let hook_result = match hook {
            Hook::Init => {
                // initialize 已保证 context 存在
                let context = context.ok_or_else(|| {
                    CoreError::Internal("init hook requires an execution context".to_string())
                })?;
                module.init(context).await
            }
            Hook::Start => module.start().await,
            Hook::Ready => module.ready().await,
            Hook::Stop => module.stop().await,
            Hook::Dispose => module.dispose().await,
        };

        match hook_result {
            Ok(()) => {
                let committed = hook.committed_status();
                {
                    let mut state = self.state.write().await;
                    if let Some(record) = state.records.get_mut(module_id) {
                        record.current = committed;
                        record.module.set_status(committed);
                    }
                }
                self.emit_event(hook.committed_event(), module_id).await;
                debug!(module_id = %module_id, hook = hook.name(), status = %committed, "生命周期钩子执行成功");
                Ok(())
            }
            Err(err) => self.handle_hook_failure(module_id, hook, err).await,
        }
    }

    /// 钩子失败路径
    async fn handle_hook_failure(
        &self,
        module_id: &str,
        hook: Hook,
        err: CoreError,
    ) -> Result<()> {
        let (previous, error_count) = {
            let mut state = self.state.write().await;
            let record = state
                .records
                .get_mut(module_id)
                .ok_or_else(|| CoreError::ModuleNotFound(module_id.to_string()))?;

            record.error_count += 1;
            record.current = ModuleStatus::Error;
            record.module.set_status(ModuleStatus::Error);
            (record.previous, record.error_count)
        };

        warn!(
            module_id = %module_id,
            hook = hook.name(),
            error_count = error_count,
            error = %err,
            "生命周期钩子执行失败"
        );

        let payload = json!({
            "module_id": module_id,
            "hook": hook.name(),
            "previous_status": previous.map(|s| s.to_string()),
            "error_count": error_count,
            "error": err.to_string(),
        });
        if let Err(emit_err) = self
            .event_bus
            .emit_with_context(
                system_events::MODULE_ERROR,
                payload,
                module_id,
                self.event_context.clone(),
            )
            .await
        {
            warn!(error = %emit_err, "模块错误事件广播失败");
        }

        // 尽力而为的状态回退，不重新调用任何钩子
        if error_count < 3 {
            if let Some(previous) = previous {
                let mut state = self.state.write().await;
                if let Some(record) = state.records.get_mut(module_id) {
                    record.current = previous;
                    record.module.set_status(previous);
                }
            }
        }

        Err(CoreError::hook_failed(module_id, hook.name(), &err))
    }

    async fn emit_event(&self, event_type: &str, module_id: &str) {
        let payload = json!({ "module_id": module_id });
        if let Err(err) = self
            .event_bus
            .emit_with_context(
                event_type,
                payload,
                module_id,
                self.event_context.clone(),
            )
            .await
        {
            warn!(event_type = %event_type, error = %err, "生命周期事件广播失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextType, ResourceProvider, SharedContext, TenantInfo};
    use crate::core::config::EventBusConfig;
    use crate::module::StatusCell;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopResources;

    #[async_trait]
    impl ResourceProvider for NoopResources {
        async fn register(&self, _name: &str, _resource: Value) -> Result<()> {
            Ok(())
        }
        async fn get(&self, name: &str) -> Result<Value> {
            Err(CoreError::ResourceNotFound(name.to_string()))
        }
        async fn has(&self, _name: &str) -> bool {
            false
        }
    }

    struct NoopShared;

    #[async_trait]
    impl SharedContext for NoopShared {
        async fn set_state(&self, _ns: &str, _key: &str, _value: Value) -> Result<()> {
            Ok(())
        }
        async fn get_state(&self, _ns: &str, _key: &str) -> Option<Value> {
            None
        }
        async fn has_state(&self, _ns: &str, _key: &str) -> bool {
            false
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    struct TestModule {
        id: String,
        status: StatusCell,
        fail_start: AtomicBool,
    }

    impl TestModule {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                status: StatusCell::new(),
                fail_start: AtomicBool::new(false),
            })
        }

        fn failing_start(id: &str) -> Arc<Self> {
            let m = Self::new(id);
            m.fail_start.store(true, Ordering::SeqCst);
            m
        }
    }

    #[async_trait]
    impl Module for TestModule {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            &self.id
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn status(&self) -> ModuleStatus {
            self.status.get()
        }
        fn set_status(&self, status: ModuleStatus) {
            self.status.set(status);
        }
        async fn init(&self, _context: Arc<ExecutionContext>) -> Result<()> {
            Ok(())
        }
        async fn start(&self) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(CoreError::Internal("start failure for test".to_string()));
            }
            Ok(())
        }
        async fn ready(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    fn harness() -> (LifecycleManager, Arc<ExecutionContext>, Arc<EventBus>) {
        // 节流窗口设为 0，生命周期事件不会互相抑制
        let bus = Arc::new(EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 0,
        }));
        let manager = LifecycleManager::new(bus.clone(), EventContext::new("bp-test", None));
        let context = Arc::new(ExecutionContext::new(
            "bp-test",
            ContextType::Organization,
            TenantInfo::default(),
            bus.clone(),
            Arc::new(NoopResources),
            Arc::new(NoopShared),
        ));
        (manager, context, bus)
    }

    #[tokio::test]
    async fn test_full_lifecycle_status_sequence() {
        let (manager, context, _bus) = harness();
        let module = TestModule::new("m1");

        manager.initialize(module.clone(), context).await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Initialized);

        manager.start("m1").await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Started);

        manager.ready("m1").await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Ready);

        manager.stop("m1").await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Stopped);

        manager.dispose("m1").await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Disposed);
        assert_eq!(manager.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_initialize_fails() {
        let (manager, context, _bus) = harness();
        let module = TestModule::new("m1");

        manager
            .initialize(module.clone(), context.clone())
            .await
            .unwrap();
        let err = manager.initialize(module, context).await.unwrap_err();
        assert!(matches!(err, CoreError::ModuleAlreadyInitialized(id) if id == "m1"));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let (manager, context, _bus) = harness();
        manager
            .initialize(TestModule::new("m1"), context)
            .await
            .unwrap();

        // INITIALIZED 状态下不允许 stop
        let err = manager.stop("m1").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert!(err.to_string().contains("INITIALIZED"));
        assert!(err.to_string().contains("STOPPING"));

        // 校验失败不计入错误次数
        let state = manager.state_of("m1").await.unwrap();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.current_status, ModuleStatus::Initialized);
    }

    #[tokio::test]
    async fn test_unknown_module_queries_fail() {
        let (manager, _context, _bus) = harness();
        assert!(matches!(
            manager.state_of("ghost").await,
            Err(CoreError::ModuleNotFound(_))
        ));
        assert!(matches!(
            manager.start("ghost").await,
            Err(CoreError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hook_failure_rolls_back_and_rethrows() {
        let (manager, context, bus) = harness();
        let module = TestModule::failing_start("m1");
        manager
            .initialize(module.clone(), context)
            .await
            .unwrap();

        let err = manager.start("m1").await.unwrap_err();
        assert!(matches!(err, CoreError::HookFailed { .. }));
        assert!(err.to_string().contains("start failure for test"));

        // 错误计数为 1，状态指针回退到 INITIALIZED
        let state = manager.state_of("m1").await.unwrap();
        assert_eq!(state.error_count, 1);
        assert_eq!(state.current_status, ModuleStatus::Initialized);
        assert_eq!(module.status(), ModuleStatus::Initialized);

        // 广播了 module.error，携带失败前状态和错误计数
        let history = bus.get_history(Some(system_events::MODULE_ERROR), 10).await;
        assert_eq!(history.len(), 1);
        let payload = &history[0].payload;
        assert_eq!(payload["previous_status"], "INITIALIZED");
        assert_eq!(payload["error_count"], 1);
    }

    #[tokio::test]
    async fn test_third_failure_stays_in_error() {
        let (manager, context, _bus) = harness();
        let module = TestModule::failing_start("m1");
        manager
            .initialize(module.clone(), context)
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(manager.start("m1").await.is_err());
        }
        // 前两次失败后回退，第三次失败后停留在 ERROR
        assert!(manager.start("m1").await.is_err());

        let state = manager.state_of("m1").await.unwrap();
        assert_eq!(state.error_count, 3);
        assert_eq!(state.current_status, ModuleStatus::Error);
        assert_eq!(module.status(), ModuleStatus::Error);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (manager, context, _bus) = harness();
        let module = TestModule::new("m1");
        manager.initialize(module.clone(), context).await.unwrap();

        manager.start("m1").await.unwrap();
        manager.ready("m1").await.unwrap();
        manager.stop("m1").await.unwrap();

        // STOPPED -> STARTING 重启路径
        manager.start("m1").await.unwrap();
        assert_eq!(module.status(), ModuleStatus::Started);
    }

    #[tokio::test]
    async fn test_modules_in_state_insertion_order() {
        let (manager, context, _bus) = harness();
        for id in ["a", "b", "c"] {
            manager
                .initialize(TestModule::new(id), context.clone())
                .await
                .unwrap();
        }
        manager.start("b").await.unwrap();

        assert_eq!(
            manager.modules_in_state(ModuleStatus::Initialized).await,
            vec!["a", "c"]
        );
        assert_eq!(
            manager.modules_in_state(ModuleStatus::Started).await,
            vec!["b"]
        );
    }

    #[tokio::test]
    async fn test_lifecycle_events_emitted() {
        let (manager, context, bus) = harness();
        let module = TestModule::new("m1");
        manager.initialize(module, context).await.unwrap();
        manager.start("m1").await.unwrap();
        manager.ready("m1").await.unwrap();

        let types: Vec<String> = bus
            .get_history(None, 100)
            .await
            .into_iter()
            .map(|e| e.event_type)
            .collect();

        assert_eq!(
            types,
            vec![
                system_events::MODULE_INITIALIZED,
                system_events::MODULE_STARTING,
                system_events::MODULE_STARTED,
                system_events::MODULE_READY,
            ]
        );
    }
}
