//! 蓝图容器错误类型定义
//!
//! 本模块定义了容器运行时中使用的所有错误类型。

use thiserror::Error;

/// 容器核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 注册表错误 ====================

    /// 模块 ID 已注册
    #[error("Module '{0}' is already registered")]
    ModuleAlreadyRegistered(String),

    /// 模块未找到
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// 加载时依赖缺失
    #[error("Missing dependencies for module '{module}': {missing:?}")]
    MissingDependencies {
        module: String,
        missing: Vec<String>,
    },

    /// 模块有依赖者，无法卸载
    #[error("Module '{module}' has dependents and cannot be unloaded: {dependents:?}")]
    ModuleHasDependents {
        module: String,
        dependents: Vec<String>,
    },

    /// 循环依赖
    #[error("Circular dependencies detected: {}", format_cycles(.0))]
    CircularDependencies(Vec<Vec<String>>),

    /// 无效的模块元数据
    #[error("Invalid module metadata: {0}")]
    InvalidMetadata(String),

    // ==================== 生命周期错误 ====================

    /// 非法的生命周期状态转换
    #[error("Invalid lifecycle transition for module '{module}': {from} -> {to}")]
    InvalidTransition {
        module: String,
        from: String,
        to: String,
    },

    /// 模块钩子执行失败
    #[error("Module '{module}' hook '{hook}' failed: {reason}")]
    HookFailed {
        module: String,
        hook: String,
        reason: String,
    },

    /// 模块已被生命周期管理器跟踪
    #[error("Module '{0}' is already initialized")]
    ModuleAlreadyInitialized(String),

    // ==================== 容器错误 ====================

    /// 容器状态不允许此操作
    #[error("Container is in state '{actual}', operation requires '{expected}'")]
    InvalidContainerState { expected: String, actual: String },

    /// 容器尚未初始化
    #[error("Container is not initialized")]
    ContainerNotInitialized,

    // ==================== 事件系统错误 ====================

    /// 订阅未找到
    #[error("Subscription '{0}' not found")]
    SubscriptionNotFound(String),

    /// 事件总线已释放
    #[error("Event bus has been disposed")]
    BusDisposed,

    // ==================== 外部协作者错误 ====================

    /// 资源未注册
    #[error("Resource '{0}' is not registered")]
    ResourceNotFound(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("Version parse error: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 将循环路径格式化为 `a -> b -> a; c -> c` 的形式
fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|path| path.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 容器操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// 将任意钩子错误包装为 HookFailed
    pub fn hook_failed(
        module: impl Into<String>,
        hook: impl Into<String>,
        err: &CoreError,
    ) -> Self {
        CoreError::HookFailed {
            module: module.into(),
            hook: hook.into(),
            reason: err.to_string(),
        }
    }
}
