//! 事件系统数据结构
//!
//! 定义事件总线的核心数据结构。事件一经发布即不可变，
//! 仅保存在有界历史缓冲区中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::generate_event_id;

/// 事件携带的执行上下文摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    /// 蓝图 ID
    pub blueprint_id: String,

    /// 用户 ID（未登录或系统事件时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl EventContext {
    /// 创建事件上下文
    pub fn new(blueprint_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            blueprint_id: blueprint_id.into(),
            user_id,
        }
    }
}

/// 事件
///
/// 事件 ID 由毫秒时间戳和进程内单调递增序号组成，
/// 进程重启后不保证全局唯一。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub id: String,

    /// 事件类型（格式: category.name，如 module.loaded）
    pub event_type: String,

    /// 事件数据
    #[serde(default)]
    pub payload: Value,

    /// 事件时间戳（序列化为毫秒）
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// 事件来源（模块 ID 或 "container"）
    pub source: String,

    /// 执行上下文摘要
    #[serde(default)]
    pub context: EventContext,
}

impl Event {
    /// 创建新事件
    pub fn new(
        event_type: impl Into<String>,
        payload: Value,
        source: impl Into<String>,
        context: EventContext,
    ) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
            source: source.into(),
            context,
        }
    }

    /// 事件时间戳（毫秒）
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// 预定义的系统事件类型
pub mod system_events {
    /// 容器初始化完成
    pub const CONTAINER_INITIALIZED: &str = "container.initialized";
    /// 容器开始启动模块
    pub const CONTAINER_STARTING: &str = "container.starting";
    /// 容器启动完成
    pub const CONTAINER_STARTED: &str = "container.started";
    /// 容器开始停止模块
    pub const CONTAINER_STOPPING: &str = "container.stopping";
    /// 容器停止完成
    pub const CONTAINER_STOPPED: &str = "container.stopped";
    /// 容器级错误
    pub const CONTAINER_ERROR: &str = "container.error";

    /// 模块加载完成（已注册并初始化）
    pub const MODULE_LOADED: &str = "module.loaded";
    /// 模块卸载完成
    pub const MODULE_UNLOADED: &str = "module.unloaded";
    /// 模块初始化完成
    pub const MODULE_INITIALIZED: &str = "module.initialized";
    /// 模块开始启动
    pub const MODULE_STARTING: &str = "module.starting";
    /// 模块启动完成
    pub const MODULE_STARTED: &str = "module.started";
    /// 模块就绪
    pub const MODULE_READY: &str = "module.ready";
    /// 模块开始停止
    pub const MODULE_STOPPING: &str = "module.stopping";
    /// 模块停止完成
    pub const MODULE_STOPPED: &str = "module.stopped";
    /// 模块已释放
    pub const MODULE_DISPOSED: &str = "module.disposed";
    /// 模块错误
    pub const MODULE_ERROR: &str = "module.error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let ctx = EventContext::new("bp-1", Some("user-1".to_string()));
        let event = Event::new("module.loaded", json!({"module_id": "tasks"}), "container", ctx);

        assert!(!event.id.is_empty());
        assert_eq!(event.event_type, "module.loaded");
        assert_eq!(event.source, "container");
        assert_eq!(event.context.blueprint_id, "bp-1");
        assert!(event.timestamp_millis() > 0);
    }

    #[test]
    fn test_event_serialization_uses_millis() {
        let event = Event::new("test.event", json!({}), "container", EventContext::default());
        let value = serde_json::to_value(&event).unwrap();

        assert!(value["timestamp"].is_i64());
        assert_eq!(value["timestamp"].as_i64().unwrap(), event.timestamp_millis());

        let parsed: Event = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.event_type, event.event_type);
    }

    #[test]
    fn test_event_ids_distinct() {
        let a = Event::new("t", json!({}), "container", EventContext::default());
        let b = Event::new("t", json!({}), "container", EventContext::default());
        assert_ne!(a.id, b.id);
    }
}
