//! # Blueprint Core
//!
//! 进程内模块容器运行时：注册可插拔的业务模块，解析模块间的
//! 依赖声明得到安全的启动顺序，驱动每个模块走过严格的生命周期
//! 状态机，并让模块与宿主只通过内部事件总线通信。
//!
//! ## 核心组件
//!
//! - [`container::Container`] — 组合根，宿主面向的完整 API
//! - [`module::ModuleRegistry`] — 模块注册表与依赖解析
//! - [`module::LifecycleManager`] — 生命周期状态机与钩子调度
//! - [`bus::EventBus`] — 带节流和有界历史的发布/订阅总线
//!
//! ## 快速开始
//!
//! ```ignore
//! use blueprint_core::{Container, ContainerConfig, EventBus};
//! use std::sync::Arc;
//!
//! let config = ContainerConfig::builder().blueprint_id("demo").build();
//! let bus = Arc::new(EventBus::with_config(&config.event_bus));
//! let container = Container::new(config, bus, resources, shared_context);
//!
//! container.initialize().await?;
//! container.load_module(my_module).await?;
//! container.start().await?;
//! ```

#![warn(missing_docs)]

pub mod bus;
pub mod container;
pub mod context;
pub mod core;
pub mod module;
pub mod utils;

pub use bus::{system_events, Event, EventBus, EventContext, EventHandler};
pub use container::{Container, ContainerState};
pub use context::{
    ContextType, ExecutionContext, ResourceProvider, SharedContext, TenantInfo,
};
pub use crate::core::{ContainerConfig, ContainerConfigBuilder, EventBusConfig, LogConfig};
pub use module::{
    DependencyResolution, LifecycleManager, Module, ModuleLifecycleState, ModuleMetadata,
    ModuleRegistry, ModuleStatus, StatusCell,
};
pub use utils::{CoreError, Result};

/// 库版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
