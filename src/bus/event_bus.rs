//! 事件总线
//!
//! 提供按事件类型的发布/订阅机制，是模块与宿主之间唯一的通信通道。
//!
//! # 主要功能
//!
//! - **同步分发**: 发布者视角下处理器依次同步执行
//! - **处理器隔离**: 单个处理器 panic 不影响其他处理器
//! - **节流**: 同类型事件在节流窗口内重复发布会被直接丢弃（尽力而为的风暴抑制）
//! - **有界历史**: 历史缓冲区超出容量后按 FIFO 淘汰最旧事件
//!
//! # 使用示例
//!
//! ```ignore
//! use blueprint_core::bus::{EventBus, EventContext};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let sub_id = bus.on("module.loaded", Arc::new(|event| {
//!     println!("收到事件: {}", event.event_type);
//! })).await?;
//!
//! bus.emit("module.loaded", serde_json::json!({}), "container").await?;
//! bus.off(&sub_id).await;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::bus::event::{Event, EventContext};
use crate::core::config::EventBusConfig;
use crate::utils::{generate_subscription_id, CoreError, Result};

/// 事件处理器类型
///
/// 处理器是同步闭包，必须线程安全。
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// 内部订阅条目
#[derive(Clone)]
struct SubscriptionEntry {
    /// 订阅唯一标识
    subscription_id: String,

    /// 事件处理器
    handler: EventHandler,

    /// 是否仍然有效（取消订阅后置为 false，延迟清理）
    active: Arc<AtomicBool>,

    /// 一次性订阅的触发守卫（防止重入导致重复触发）
    fired: Option<Arc<AtomicBool>>,
}

impl SubscriptionEntry {
    fn new(handler: EventHandler, once: bool) -> Self {
        Self {
            subscription_id: generate_subscription_id(),
            handler,
            active: Arc::new(AtomicBool::new(true)),
            fired: if once {
                Some(Arc::new(AtomicBool::new(false)))
            } else {
                None
            },
        }
    }
}

/// 分发统计信息
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// 接受的事件数
    pub emitted: u64,

    /// 被节流丢弃的事件数
    pub throttled: u64,

    /// 成功投递次数（按处理器计）
    pub delivered: u64,

    /// 处理器失败次数（panic 被捕获）
    pub handler_failures: u64,

    /// 最后分发时间
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

/// 内部可变状态
struct BusState {
    /// 订阅列表：事件类型 -> 订阅条目列表
    subscriptions: HashMap<String, Vec<SubscriptionEntry>>,

    /// 订阅索引：订阅 ID -> 事件类型
    subscription_index: HashMap<String, String>,

    /// 有界历史缓冲区（最旧在前）
    history: VecDeque<Event>,

    /// 同类型事件的最近一次接受时间
    last_emission: HashMap<String, Instant>,

    /// 分发统计
    stats: DispatchStats,
}

/// 事件总线
///
/// 使用 `Arc<RwLock>` 保护内部状态；克隆总线得到共享同一份状态的句柄。
#[derive(Clone)]
pub struct EventBus {
    state: Arc<RwLock<BusState>>,

    /// 已释放标记，释放后拒绝新的发布和订阅
    disposed: Arc<AtomicBool>,

    /// 历史容量
    history_capacity: usize,

    /// 节流窗口
    throttle_window: Duration,
}

impl EventBus {
    /// 创建新的事件总线（默认配置）
    pub fn new() -> Self {
        Self::with_config(&EventBusConfig::default())
    }

    /// 使用自定义配置创建事件总线
    pub fn with_config(config: &EventBusConfig) -> Self {
        debug!(
            history_capacity = config.history_capacity,
            throttle_window_ms = config.throttle_window_ms,
            "创建事件总线"
        );
        Self {
            state: Arc::new(RwLock::new(BusState {
                subscriptions: HashMap::new(),
                subscription_index: HashMap::new(),
                history: VecDeque::with_capacity(config.history_capacity),
                last_emission: HashMap::new(),
                stats: DispatchStats::default(),
            })),
            disposed: Arc::new(AtomicBool::new(false)),
            history_capacity: config.history_capacity.max(1),
            throttle_window: Duration::from_millis(config.throttle_window_ms),
        }
    }

    /// 发布事件
    ///
    /// 同类型事件在节流窗口内重复发布会被丢弃（返回 `Ok(None)` 并记录警告）。
    /// 被接受的事件先写入历史缓冲区，再同步分发给该类型的全部处理器；
    /// 单个处理器 panic 会被捕获，不影响后续处理器。
    ///
    /// # Errors
    ///
    /// 总线已释放时返回 `CoreError::BusDisposed`
    pub async fn emit(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Result<Option<Event>> {
        self.emit_with_context(event_type, payload, source, EventContext::default())
            .await
    }

    /// 发布携带执行上下文摘要的事件
    pub async fn emit_with_context(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
        context: EventContext,
    ) -> Result<Option<Event>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CoreError::BusDisposed);
        }

        let event_type = event_type.into();
        let now = Instant::now();

        // 节流检查 + 事件入库在同一个写锁内完成
        let (event, handlers) = {
            let mut state = self.state.write().await;

            if let Some(last) = state.last_emission.get(&event_type) {
                if now.duration_since(*last) < self.throttle_window {
                    state.stats.throttled += 1;
                    warn!(event_type = %event_type, "事件被节流丢弃");
                    return Ok(None);
                }
            }
            state.last_emission.insert(event_type.clone(), now);

            let event = Event::new(event_type.clone(), payload, source, context);

            state.history.push_back(event.clone());
            while state.history.len() > self.history_capacity {
                state.history.pop_front();
            }

            state.stats.emitted += 1;
            state.stats.last_dispatch_at = Some(Utc::now());

            let handlers: Vec<SubscriptionEntry> = state
                .subscriptions
                .get(&event_type)
                .map(|entries| entries.to_vec())
                .unwrap_or_default();

            (event, handlers)
        };

        trace!(event_id = %event.id, event_type = %event.event_type, "分发事件");

        // 锁外分发，避免处理器内再次操作总线时死锁
        let mut delivered = 0u64;
        let mut failures = 0u64;
        let mut spent: Vec<String> = Vec::new();

        for entry in &handlers {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }

            // 一次性订阅：先占位再触发，防止重入导致重复触发
            if let Some(ref fired) = entry.fired {
                if fired
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
            }

            let handler = entry.handler.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&event);
            }));

            match result {
                Ok(()) => delivered += 1,
                Err(_) => {
                    failures += 1;
                    warn!(
                        subscription_id = %entry.subscription_id,
                        event_type = %event.event_type,
                        "事件处理器 panic，已隔离"
                    );
                }
            }

            if entry.fired.is_some() {
                entry.active.store(false, Ordering::SeqCst);
                spent.push(entry.subscription_id.clone());
            }
        }

        {
            let mut state = self.state.write().await;
            state.stats.delivered += delivered;
            state.stats.handler_failures += failures;
            for id in spent {
                Self::remove_entry(&mut state, &id);
            }
        }

        Ok(Some(event))
    }

    /// 订阅事件类型
    ///
    /// 返回订阅 ID，通过 [`EventBus::off`] 取消订阅。
    ///
    /// # Errors
    ///
    /// 总线已释放时返回 `CoreError::BusDisposed`
    pub async fn on(&self, event_type: impl Into<String>, handler: EventHandler) -> Result<String> {
        self.register(event_type.into(), handler, false).await
    }

    /// 订阅事件类型，首次成功投递后自动取消订阅
    pub async fn once(
        &self,
        event_type: impl Into<String>,
        handler: EventHandler,
    ) -> Result<String> {
        self.register(event_type.into(), handler, true).await
    }

    async fn register(&self, event_type: String, handler: EventHandler, once: bool) -> Result<String> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CoreError::BusDisposed);
        }

        let entry = SubscriptionEntry::new(handler, once);
        let subscription_id = entry.subscription_id.clone();

        let mut state = self.state.write().await;
        state
            .subscriptions
            .entry(event_type.clone())
            .or_default()
            .push(entry);
        state
            .subscription_index
            .insert(subscription_id.clone(), event_type.clone());

        debug!(
            subscription_id = %subscription_id,
            event_type = %event_type,
            once = once,
            "事件订阅成功"
        );

        Ok(subscription_id)
    }

    /// 取消订阅
    ///
    /// 幂等操作：订阅不存在（或已取消）时返回 `false`。
    pub async fn off(&self, subscription_id: &str) -> bool {
        let mut state = self.state.write().await;
        Self::remove_entry(&mut state, subscription_id)
    }

    fn remove_entry(state: &mut BusState, subscription_id: &str) -> bool {
        let Some(event_type) = state.subscription_index.remove(subscription_id) else {
            return false;
        };

        if let Some(entries) = state.subscriptions.get_mut(&event_type) {
            if let Some(entry) = entries
                .iter()
                .find(|e| e.subscription_id == subscription_id)
            {
                entry.active.store(false, Ordering::SeqCst);
            }
            entries.retain(|e| e.subscription_id != subscription_id);
            if entries.is_empty() {
                state.subscriptions.remove(&event_type);
            }
        }
        true
    }

    /// 查询事件历史
    ///
    /// 返回最多 `limit` 条匹配事件，最新的在最后。
    /// `event_type` 为 `None` 时返回全部类型。
    pub async fn get_history(&self, event_type: Option<&str>, limit: usize) -> Vec<Event> {
        let state = self.state.read().await;
        let matching: Vec<&Event> = state
            .history
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .collect();

        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// 当前总订阅数
    pub async fn subscription_count(&self) -> usize {
        let state = self.state.read().await;
        state.subscription_index.len()
    }

    /// 是否有处理器订阅了指定事件类型
    pub async fn has_subscribers(&self, event_type: &str) -> bool {
        let state = self.state.read().await;
        state
            .subscriptions
            .get(event_type)
            .map_or(false, |v| !v.is_empty())
    }

    /// 获取分发统计信息
    pub async fn stats(&self) -> DispatchStats {
        let state = self.state.read().await;
        state.stats.clone()
    }

    /// 重置统计信息
    pub async fn reset_stats(&self) {
        let mut state = self.state.write().await;
        state.stats = DispatchStats::default();
    }

    /// 释放总线
    ///
    /// 取消全部订阅、清空历史，之后拒绝新的发布和订阅。
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);

        let mut state = self.state.write().await;
        for entries in state.subscriptions.values() {
            for entry in entries {
                entry.active.store(false, Ordering::SeqCst);
            }
        }
        state.subscriptions.clear();
        state.subscription_index.clear();
        state.history.clear();
        state.last_emission.clear();

        debug!("事件总线已释放");
    }

    /// 总线是否已释放
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fast_bus() -> EventBus {
        // 测试用：节流窗口缩短到 10ms
        EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 10,
        })
    }

    #[tokio::test]
    async fn test_emit_and_subscribe() {
        let bus = fast_bus();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.on(
            "test.event",
            Arc::new(move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        let event = bus.emit("test.event", json!({"k": "v"}), "container").await.unwrap();
        assert!(event.is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttle_drops_second_emission() {
        let bus = EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 60_000,
        });

        let first = bus.emit("burst.event", json!({}), "m").await.unwrap();
        let second = bus.emit("burst.event", json!({}), "m").await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());

        // 历史里只有一条
        let history = bus.get_history(Some("burst.event"), 100).await;
        assert_eq!(history.len(), 1);

        let stats = bus.stats().await;
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.throttled, 1);
    }

    #[tokio::test]
    async fn test_throttle_is_per_type() {
        let bus = EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 60_000,
        });

        assert!(bus.emit("type.a", json!({}), "m").await.unwrap().is_some());
        assert!(bus.emit("type.b", json!({}), "m").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_history_capacity_eviction() {
        let bus = EventBus::with_config(&EventBusConfig {
            history_capacity: 3,
            throttle_window_ms: 0,
        });

        for i in 0..10 {
            bus.emit(format!("event.{}", i), json!({}), "m").await.unwrap();
        }

        let history = bus.get_history(None, 100).await;
        assert_eq!(history.len(), 3);
        // 最旧的被淘汰，剩下最近三条，最新在最后
        assert_eq!(history[0].event_type, "event.7");
        assert_eq!(history[2].event_type, "event.9");
    }

    #[tokio::test]
    async fn test_get_history_limit_and_filter() {
        let bus = EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 0,
        });

        for _ in 0..5 {
            bus.emit("keep.event", json!({}), "m").await.unwrap();
        }
        bus.emit("other.event", json!({}), "m").await.unwrap();

        let filtered = bus.get_history(Some("keep.event"), 3).await;
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|e| e.event_type == "keep.event"));

        let all = bus.get_history(None, 100).await;
        assert_eq!(all.len(), 6);
        assert_eq!(all.last().unwrap().event_type, "other.event");
    }

    #[tokio::test]
    async fn test_off_stops_delivery_and_is_idempotent() {
        let bus = fast_bus();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let sub_id = bus
            .on(
                "test.event",
                Arc::new(move |_| {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        bus.emit("test.event", json!({}), "m").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(bus.off(&sub_id).await);
        assert!(!bus.off(&sub_id).await); // 幂等

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.emit("test.event", json!({}), "m").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_fires_single_time() {
        let bus = EventBus::with_config(&EventBusConfig {
            history_capacity: 100,
            throttle_window_ms: 0,
        });
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.once(
            "test.event",
            Arc::new(move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        bus.emit("test.event", json!({}), "m").await.unwrap();
        bus.emit("test.event", json!({}), "m").await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_handler_panic_isolation() {
        let bus = fast_bus();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        bus.on(
            "test.event",
            Arc::new(|_| {
                panic!("intentional panic for test");
            }),
        )
        .await
        .unwrap();

        bus.on(
            "test.event",
            Arc::new(move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        bus.emit("test.event", json!({}), "m").await.unwrap();

        // panic 的处理器不影响后续处理器
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = bus.stats().await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.handler_failures, 1);
    }

    #[tokio::test]
    async fn test_dispose_rejects_new_operations() {
        let bus = fast_bus();
        bus.on("test.event", Arc::new(|_| {})).await.unwrap();
        bus.emit("test.event", json!({}), "m").await.unwrap();

        bus.dispose().await;

        assert!(bus.is_disposed());
        assert_eq!(bus.subscription_count().await, 0);
        assert!(bus.get_history(None, 100).await.is_empty());
        assert!(matches!(
            bus.emit("test.event", json!({}), "m").await,
            Err(CoreError::BusDisposed)
        ));
        assert!(matches!(
            bus.on("test.event", Arc::new(|_| {})).await,
            Err(CoreError::BusDisposed)
        ));
    }

    #[tokio::test]
    async fn test_has_subscribers() {
        let bus = fast_bus();
        assert!(!bus.has_subscribers("test.event").await);

        let sub = bus.on("test.event", Arc::new(|_| {})).await.unwrap();
        assert!(bus.has_subscribers("test.event").await);

        bus.off(&sub).await;
        assert!(!bus.has_subscribers("test.event").await);
    }
}
