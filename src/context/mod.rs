//! 执行上下文
//!
//! 模块在初始化时收到一个执行上下文，之后通过它访问事件总线、
//! 资源提供者和跨模块共享状态。上下文的各个协作者由宿主在
//! 构造容器时显式注入，容器自身不提供默认实现。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EventBus;
use crate::utils::Result;

/// 执行上下文类型
///
/// 标识容器运行在哪一级租户范围内。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    /// 组织级
    #[default]
    Organization,
    /// 团队级
    Team,
    /// 用户级
    User,
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextType::Organization => write!(f, "organization"),
            ContextType::Team => write!(f, "team"),
            ContextType::User => write!(f, "user"),
        }
    }
}

/// 租户信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantInfo {
    /// 组织 ID
    #[serde(default)]
    pub organization_id: Option<String>,

    /// 团队 ID
    #[serde(default)]
    pub team_id: Option<String>,

    /// 用户 ID
    #[serde(default)]
    pub user_id: Option<String>,
}

/// 资源提供者
///
/// 宿主通过该接口向模块暴露外部资源（数据库连接、HTTP 客户端等）。
/// 资源以 JSON 值的形式交换，具体类型约定由宿主和模块自行协商。
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// 注册命名资源
    async fn register(&self, name: &str, resource: Value) -> Result<()>;

    /// 获取命名资源
    ///
    /// # Errors
    ///
    /// 资源未注册时返回 `CoreError::ResourceNotFound`
    async fn get(&self, name: &str) -> Result<Value>;

    /// 资源是否已注册
    async fn has(&self, name: &str) -> bool;
}

/// 跨模块共享状态
///
/// 键按模块 ID 作命名空间隔离，模块只能读写自己命名空间下的状态。
#[async_trait]
pub trait SharedContext: Send + Sync {
    /// 写入状态
    async fn set_state(&self, namespace: &str, key: &str, value: Value) -> Result<()>;

    /// 读取状态
    async fn get_state(&self, namespace: &str, key: &str) -> Option<Value>;

    /// 状态是否存在
    async fn has_state(&self, namespace: &str, key: &str) -> bool;

    /// 清空全部状态（容器释放时调用）
    async fn clear(&self) -> Result<()>;
}

/// 模块执行上下文
///
/// 初始化时交给模块，之后模块持有 `Arc` 共享同一份上下文。
#[derive(Clone)]
pub struct ExecutionContext {
    /// 所属蓝图 ID
    pub blueprint_id: String,

    /// 上下文类型
    pub context_type: ContextType,

    /// 租户信息
    pub tenant: TenantInfo,

    /// 事件总线
    pub event_bus: Arc<EventBus>,

    /// 资源提供者
    pub resources: Arc<dyn ResourceProvider>,

    /// 跨模块共享状态
    pub shared_context: Arc<dyn SharedContext>,
}

impl ExecutionContext {
    /// 创建执行上下文
    pub fn new(
        blueprint_id: impl Into<String>,
        context_type: ContextType,
        tenant: TenantInfo,
        event_bus: Arc<EventBus>,
        resources: Arc<dyn ResourceProvider>,
        shared_context: Arc<dyn SharedContext>,
    ) -> Self {
        Self {
            blueprint_id: blueprint_id.into(),
            context_type,
            tenant,
            event_bus,
            resources,
            shared_context,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("blueprint_id", &self.blueprint_id)
            .field("context_type", &self.context_type)
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_type_serde() {
        let json = serde_json::to_string(&ContextType::Organization).unwrap();
        assert_eq!(json, "\"organization\"");

        let parsed: ContextType = serde_json::from_str("\"team\"").unwrap();
        assert_eq!(parsed, ContextType::Team);
    }

    #[test]
    fn test_context_type_default_and_display() {
        assert_eq!(ContextType::default(), ContextType::Organization);
        assert_eq!(ContextType::User.to_string(), "user");
    }
}
