//! 模块元数据与生命周期状态
//!
//! 定义模块的元数据快照和九态生命周期状态机的转换规则。

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{CoreError, Result};

/// 模块生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    /// 未初始化
    Uninitialized,
    /// 已初始化
    Initialized,
    /// 启动中
    Starting,
    /// 已启动
    Started,
    /// 就绪
    Ready,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 已释放（终态）
    Disposed,
    /// 错误
    Error,
}

impl ModuleStatus {
    /// 判断能否从当前状态转换到目标状态
    pub fn can_transition(&self, target: ModuleStatus) -> bool {
        use ModuleStatus::*;
        matches!(
            (self, target),
            (Uninitialized, Initialized)
                | (Initialized, Starting)
                | (Starting, Started)
                | (Started, Ready)
                | (Ready, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Disposed)
                | (Stopped, Starting)
                | (Error, Initialized)
                | (Error, Stopped)
        ) || (target == Error && !matches!(self, Disposed | Error))
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleStatus::Disposed)
    }

    /// 是否处于运行中（已就绪）
    pub fn is_ready(&self) -> bool {
        matches!(self, ModuleStatus::Ready)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Uninitialized => "UNINITIALIZED",
            ModuleStatus::Initialized => "INITIALIZED",
            ModuleStatus::Starting => "STARTING",
            ModuleStatus::Started => "STARTED",
            ModuleStatus::Ready => "READY",
            ModuleStatus::Stopping => "STOPPING",
            ModuleStatus::Stopped => "STOPPED",
            ModuleStatus::Disposed => "DISPOSED",
            ModuleStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// 模块元数据快照
///
/// 注册时从模块实例采集，注册表中保持不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// 模块唯一标识
    pub id: String,

    /// 模块名称
    pub name: String,

    /// 模块版本（语义化版本）
    pub version: String,

    /// 声明的依赖模块 ID 列表
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// 注册时间
    pub registered_at: DateTime<Utc>,
}

impl ModuleMetadata {
    /// 创建模块元数据
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            dependencies,
            registered_at: Utc::now(),
        }
    }

    /// 校验元数据
    ///
    /// 要求非空 ID、非空名称、合法的语义化版本号。
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidMetadata(
                "module id must not be empty".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(CoreError::InvalidMetadata(
                "module name must not be empty".to_string(),
            ));
        }
        Version::parse(&self.version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use ModuleStatus::*;
        assert!(Uninitialized.can_transition(Initialized));
        assert!(Initialized.can_transition(Starting));
        assert!(Starting.can_transition(Started));
        assert!(Started.can_transition(Ready));
        assert!(Ready.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));
        assert!(Stopped.can_transition(Disposed));
        // 重启路径
        assert!(Stopped.can_transition(Starting));
        // 错误恢复路径
        assert!(Error.can_transition(Initialized));
        assert!(Error.can_transition(Stopped));
    }

    #[test]
    fn test_error_reachable_from_live_states() {
        use ModuleStatus::*;
        for from in [
            Uninitialized,
            Initialized,
            Starting,
            Started,
            Ready,
            Stopping,
            Stopped,
        ] {
            assert!(from.can_transition(Error), "{} -> ERROR", from);
        }
        assert!(!Disposed.can_transition(Error));
    }

    #[test]
    fn test_forbidden_transitions() {
        use ModuleStatus::*;
        assert!(!Uninitialized.can_transition(Starting));
        assert!(!Initialized.can_transition(Ready));
        assert!(!Initialized.can_transition(Stopping));
        assert!(!Ready.can_transition(Disposed));
        // DISPOSED 是终态
        assert!(!Disposed.can_transition(Initialized));
        assert!(!Disposed.can_transition(Starting));
        assert!(Disposed.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ModuleStatus::Uninitialized.to_string(), "UNINITIALIZED");
        assert_eq!(ModuleStatus::Ready.to_string(), "READY");
    }

    #[test]
    fn test_metadata_validation() {
        let ok = ModuleMetadata::new("tasks", "任务模块", "1.0.0", vec![]);
        assert!(ok.validate().is_ok());

        let bad_id = ModuleMetadata::new("", "x", "1.0.0", vec![]);
        assert!(bad_id.validate().is_err());

        let bad_version = ModuleMetadata::new("tasks", "x", "not-a-version", vec![]);
        assert!(bad_version.validate().is_err());
    }
}
