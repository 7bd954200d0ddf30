//! 模块子系统
//!
//! 模块契约、注册表、依赖解析和生命周期管理。

pub mod contract;
pub mod dependency;
pub mod lifecycle;
pub mod metadata;
pub mod registry;

pub use contract::{Module, StatusCell};
pub use dependency::DependencyResolution;
pub use lifecycle::{LifecycleManager, ModuleLifecycleState};
pub use metadata::{ModuleMetadata, ModuleStatus};
pub use registry::ModuleRegistry;
