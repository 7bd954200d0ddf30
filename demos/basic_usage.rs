//! 容器基本用法演示
//!
//! 装载两个有依赖关系的模块，订阅生命周期事件做审计输出，
//! 然后完整走一遍启动、停止、释放流程。
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use blueprint_core::{
    system_events, Container, ContainerConfig, ContextType, CoreError, EventBus, ExecutionContext,
    Module, ModuleStatus, ResourceProvider, Result, SharedContext, StatusCell,
};
use blueprint_core::utils::{Logger, LoggerConfig};

/// 内存资源提供者
#[derive(Default)]
struct InMemoryResources {
    entries: tokio::sync::RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl ResourceProvider for InMemoryResources {
    async fn register(&self, name: &str, resource: Value) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(name.to_string(), resource);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Value> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ResourceNotFound(name.to_string()))
    }

    async fn has(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }
}

/// 内存共享状态
#[derive(Default)]
struct InMemoryShared {
    entries: tokio::sync::RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl SharedContext for InMemoryShared {
    async fn set_state(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(format!("{}:{}", namespace, key), value);
        Ok(())
    }

    async fn get_state(&self, namespace: &str, key: &str) -> Option<Value> {
        self.entries
            .read()
            .await
            .get(&format!("{}:{}", namespace, key))
            .cloned()
    }

    async fn has_state(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .read()
            .await
            .contains_key(&format!("{}:{}", namespace, key))
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// 示例业务模块：存储层
struct StorageModule {
    status: StatusCell,
}

impl StorageModule {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: StatusCell::new(),
        })
    }
}

#[async_trait]
impl Module for StorageModule {
    fn id(&self) -> &str {
        "storage"
    }
    fn name(&self) -> &str {
        "存储模块"
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

    async fn init(&self, context: Arc<ExecutionContext>) -> Result<()> {
        // 向宿主注册一个连接字符串资源，供依赖模块使用
        context
            .resources
            .register("storage.dsn", json!("memory://demo"))
            .await?;
        info!("存储模块初始化完成");
        Ok(())
    }
    async fn start(&self) -> Result<()> {
        info!("存储模块启动");
        Ok(())
    }
    async fn ready(&self) -> Result<()> {
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        info!("存储模块停止");
        Ok(())
    }
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// 示例业务模块：任务管理，依赖存储模块
struct TaskModule {
    status: StatusCell,
}

impl TaskModule {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: StatusCell::new(),
        })
    }
}

#[async_trait]
impl Module for TaskModule {
    fn id(&self) -> &str {
        "tasks"
    }
    fn name(&self) -> &str {
        "任务模块"
    }
    fn version(&self) -> &str {
        "0.3.0"
    }
    fn dependencies(&self) -> Vec<String> {
        vec!["storage".to_string()]
    }
    fn status(&self) -> ModuleStatus {
        self.status.get()
    }
    fn set_status(&self, status: ModuleStatus) {
        self.status.set(status);
    }

    async fn init(&self, context: Arc<ExecutionContext>) -> Result<()> {
        let dsn = context.resources.get("storage.dsn").await?;
        info!(dsn = %dsn, "任务模块连接存储");
        context
            .shared_context
            .set_state("tasks", "pending_count", json!(0))
            .await?;
        Ok(())
    }
    async fn start(&self) -> Result<()> {
        info!("任务模块启动");
        Ok(())
    }
    async fn ready(&self) -> Result<()> {
        info!("任务模块就绪");
        Ok(())
    }
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = Logger::init(LoggerConfig::builder().level("info").build())?;

    let config = ContainerConfig::builder()
        .blueprint_id("bp-demo")
        .context_type(ContextType::Organization)
        .build();
    let bus = Arc::new(EventBus::with_config(&config.event_bus));
    let container = Container::new(
        config,
        bus.clone(),
        Arc::new(InMemoryResources::default()),
        Arc::new(InMemoryShared::default()),
    );

    // 审计订阅：打印每个模块级事件
    for event_type in [
        system_events::MODULE_LOADED,
        system_events::MODULE_READY,
        system_events::MODULE_UNLOADED,
        system_events::MODULE_ERROR,
    ] {
        bus.on(
            event_type,
            Arc::new(|event| {
                info!(
                    event_type = %event.event_type,
                    payload = %event.payload,
                    "审计事件"
                );
            }),
        )
        .await?;
    }

    container.initialize().await?;
    container.load_module(StorageModule::new()).await?;
    container.load_module(TaskModule::new()).await?;

    container.start().await?;
    info!(state = %container.state().await, "容器运行中");

    container.stop().await?;
    container.dispose().await?;

    let history = bus.get_history(None, 100).await;
    info!(event_count = history.len(), "演示结束");
    Ok(())
}
