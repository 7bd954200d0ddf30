//! 模块契约
//!
//! 所有业务模块必须实现 [`Module`] trait：不可变的身份信息、
//! 可观测的状态，以及五个异步生命周期钩子。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::module::metadata::ModuleStatus;
use crate::utils::Result;

/// 模块契约
///
/// 五个生命周期钩子由生命周期管理器按状态机顺序调用，
/// 模块实现不应自行调用。钩子失败时返回错误，由管理器
/// 统一记录并广播。
#[async_trait]
pub trait Module: Send + Sync {
    /// 模块唯一标识
    fn id(&self) -> &str;

    /// 模块名称
    fn name(&self) -> &str;

    /// 模块版本（语义化版本字符串）
    fn version(&self) -> &str;

    /// 声明的依赖模块 ID 列表
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// 当前状态
    fn status(&self) -> ModuleStatus;

    /// 设置状态（仅供生命周期管理器调用）
    fn set_status(&self, status: ModuleStatus);

    /// 初始化钩子：注入执行上下文，准备内部资源
    async fn init(&self, context: Arc<ExecutionContext>) -> Result<()>;

    /// 启动钩子：开始对外提供服务
    async fn start(&self) -> Result<()>;

    /// 就绪钩子：启动后的最终确认
    async fn ready(&self) -> Result<()>;

    /// 停止钩子：停止对外服务，保留内部资源
    async fn stop(&self) -> Result<()>;

    /// 释放钩子：释放全部内部资源
    async fn dispose(&self) -> Result<()>;
}

/// 原子状态单元
///
/// 模块实现可用它来满足 `status`/`set_status`，
/// 读写均为无锁原子操作。
#[derive(Debug)]
pub struct StatusCell {
    value: AtomicU8,
}

impl StatusCell {
    /// 创建状态单元，初始为 UNINITIALIZED
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(Self::encode(ModuleStatus::Uninitialized)),
        }
    }

    /// 读取当前状态
    pub fn get(&self) -> ModuleStatus {
        Self::decode(self.value.load(Ordering::SeqCst))
    }

    /// 写入状态
    pub fn set(&self, status: ModuleStatus) {
        self.value.store(Self::encode(status), Ordering::SeqCst);
    }

    fn encode(status: ModuleStatus) -> u8 {
        match status {
            ModuleStatus::Uninitialized => 0,
            ModuleStatus::Initialized => 1,
            ModuleStatus::Starting => 2,
            ModuleStatus::Started => 3,
            ModuleStatus::Ready => 4,
            ModuleStatus::Stopping => 5,
            ModuleStatus::Stopped => 6,
            ModuleStatus::Disposed => 7,
            ModuleStatus::Error => 8,
        }
    }

    fn decode(value: u8) -> ModuleStatus {
        match value {
            0 => ModuleStatus::Uninitialized,
            1 => ModuleStatus::Initialized,
            2 => ModuleStatus::Starting,
            3 => ModuleStatus::Started,
            4 => ModuleStatus::Ready,
            5 => ModuleStatus::Stopping,
            6 => ModuleStatus::Stopped,
            7 => ModuleStatus::Disposed,
            _ => ModuleStatus::Error,
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
