//! 事件总线模块
//!
//! 模块与宿主之间的唯一通信通道。

pub mod event;
pub mod event_bus;

pub use event::{system_events, Event, EventContext};
pub use event_bus::{DispatchStats, EventBus, EventHandler};
