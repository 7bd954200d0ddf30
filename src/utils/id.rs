//! 事件与订阅 ID 生成器
//!
//! 事件 ID 格式为 `毫秒时间戳-单调递增序号`，在单个进程内保证唯一且可排序；
//! 进程重启后序号归零，因此不保证跨进程全局唯一。
//! 订阅 ID 使用 UUID v4。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 事件序号计数器（进程级单调递增）
static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 生成事件 ID
///
/// # Example
///
/// ```
/// use blueprint_core::utils::id::generate_event_id;
///
/// let id = generate_event_id();
/// assert!(id.contains('-'));
/// ```
pub fn generate_event_id() -> String {
    let seq = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", now_millis(), seq)
}

/// 生成 UUID v4 格式的订阅 ID
pub fn generate_subscription_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
