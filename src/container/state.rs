//! 容器状态机

use serde::{Deserialize, Serialize};
use std::fmt;

/// 容器顶层状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// 未初始化
    Uninitialized,
    /// 初始化中
    Initializing,
    /// 就绪（可加载模块、可启动）
    Ready,
    /// 运行中
    Running,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 错误
    Error,
}

impl ContainerState {
    /// 是否可以初始化
    pub fn can_initialize(&self) -> bool {
        matches!(self, ContainerState::Uninitialized)
    }

    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerState::Ready)
    }

    /// 是否可以停止
    pub fn can_stop(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// 是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Uninitialized => "uninitialized",
            ContainerState::Initializing => "initializing",
            ContainerState::Ready => "ready",
            ContainerState::Running => "running",
            ContainerState::Stopping => "stopping",
            ContainerState::Stopped => "stopped",
            ContainerState::Error => "error",
        };
        write!(f, "{}", s)
    }
}
